//! End-to-end lifecycle test driving a `PlayerEngine` through
//! prepare/start/pause/resume/stop/reset with mock nodes standing in for a
//! real source/decoder/sink stack.

use std::sync::Arc;

use ao_scheduler::FakeClock;
use app::{EngineEvent, PlayerEngine};
use engine_model::{Command, CommandStatus, EngineState, MediaType};
use hub::{NodeFactory, TrackNodes};
use mock_nodes::{MockDecoderNode, MockSinkNode, MockSourceNode};
use node_abi::{NodeHandle, TrackDescriptor, TrackMediaType, Uuid};

struct MockNodeFactory;

impl NodeFactory for MockNodeFactory {
    fn create_decoder(&self, track: &TrackDescriptor) -> Option<NodeHandle> {
        track.has_decoder.then(|| Arc::new(MockDecoderNode::new()) as NodeHandle)
    }

    fn create_sink(&self, _track: &TrackDescriptor) -> NodeHandle {
        Arc::new(MockSinkNode::new())
    }
}

fn run_until_completed(engine: &mut PlayerEngine<FakeClock>, id: u64) -> CommandStatus {
    for _ in 0..8 {
        for event in engine.run_tick() {
            if let EngineEvent::CommandCompleted { id: completed, status } = event {
                if completed == id {
                    return status;
                }
            }
        }
    }
    panic!("command {id} never completed");
}

fn engine_with_one_video_track() -> PlayerEngine<FakeClock> {
    let mut engine = PlayerEngine::new(FakeClock::new());
    engine.nodes_mut().set_source(Arc::new(MockSourceNode::new()));
    let track = engine.model_mut().add_datapath(MediaType::Video, true);
    engine.nodes_mut().add_track(
        track,
        TrackNodes {
            decoder: Some(Arc::new(MockDecoderNode::new())),
            sink: Arc::new(MockSinkNode::new()),
        },
    );
    engine.model_mut().state = EngineState::Idle;
    engine
}

#[test]
fn init_with_no_datapaths_completes_immediately() {
    let mut engine = PlayerEngine::new(FakeClock::new());
    let id = engine.submit(Command::Init);
    assert_eq!(run_until_completed(&mut engine, id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Initialized);
}

#[test]
fn prepare_start_pause_resume_stop_reset_roundtrip() {
    let mut engine = engine_with_one_video_track();

    let init_id = engine.submit(Command::Init);
    assert_eq!(run_until_completed(&mut engine, init_id), CommandStatus::Success);

    let prepare_id = engine.submit(Command::Prepare);
    assert_eq!(run_until_completed(&mut engine, prepare_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Prepared);

    let start_id = engine.submit(Command::Start);
    assert_eq!(run_until_completed(&mut engine, start_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Started);

    let pause_id = engine.submit(Command::Pause);
    assert_eq!(run_until_completed(&mut engine, pause_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Paused);

    let resume_id = engine.submit(Command::Resume);
    assert_eq!(run_until_completed(&mut engine, resume_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Started);

    let stop_id = engine.submit(Command::Stop);
    assert_eq!(run_until_completed(&mut engine, stop_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Initialized);

    let reset_id = engine.submit(Command::Reset);
    assert_eq!(run_until_completed(&mut engine, reset_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Idle);
    assert!(engine.model().datapaths.is_empty());
}

#[test]
fn cancel_all_commands_preempts_an_in_flight_prepare() {
    let mut engine = engine_with_one_video_track();
    let init_id = engine.submit(Command::Init);
    assert_eq!(run_until_completed(&mut engine, init_id), CommandStatus::Success);

    let prepare_id = engine.submit(Command::Prepare);
    // One tick dispatches Prepare and submits node commands but the mocks
    // haven't completed yet, so Prepare is still active.
    engine.run_tick();

    engine.submit(Command::CancelAllCommands);
    let mut saw_prepare_cancelled = false;
    for _ in 0..8 {
        for event in engine.run_tick() {
            if event
                == (EngineEvent::CommandCompleted {
                    id: prepare_id,
                    status: CommandStatus::Cancelled,
                })
            {
                saw_prepare_cancelled = true;
            }
        }
    }
    assert!(saw_prepare_cancelled);
}

#[test]
fn add_data_source_through_init_prepare_discovers_and_prepares_a_track() {
    let mut engine = PlayerEngine::new(FakeClock::new());
    engine.set_node_factory(Arc::new(MockNodeFactory));
    engine.nodes_mut().set_source(Arc::new(MockSourceNode::with_tracks(vec![TrackDescriptor {
        media_type: TrackMediaType::Audio,
        format: Uuid::from_bytes([9; 16]),
        has_decoder: false,
    }])));

    let add_id = engine.submit(Command::AddDataSource {
        uri: "file://clip.mp3".to_string(),
        format: Uuid::from_bytes([0; 16]),
    });
    assert_eq!(run_until_completed(&mut engine, add_id), CommandStatus::Success);
    assert_eq!(engine.model().datapaths.len(), 1);
    assert_eq!(engine.model().datapaths[0].media_type, MediaType::Audio);

    let init_id = engine.submit(Command::Init);
    assert_eq!(run_until_completed(&mut engine, init_id), CommandStatus::Success);

    let prepare_id = engine.submit(Command::Prepare);
    assert_eq!(run_until_completed(&mut engine, prepare_id), CommandStatus::Success);
    assert_eq!(engine.model().state, EngineState::Prepared);
}
