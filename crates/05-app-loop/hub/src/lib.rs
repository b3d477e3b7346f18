//! Node hub: the table of live source/decoder/sink node handles behind a
//! player session, and the fan-out/drain helpers that turn an
//! [`engine_model::NodeFanout`] plan into actual submissions.
//!
//! Generalizes the fixed four-named-service dispatch of an earlier hub
//! design (one handle each for kernel/gpu/audio/fs) to an open, per-track
//! table, since a player session's datapath count is only known once
//! `Prepare` has queried the source for its tracks.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use smallvec::SmallVec;

use engine_model::{FanoutScope, NodeFanout, TrackId};
use node_abi::{CommandId, Node, NodeCommand, NodeEvent, NodeHandle, SubmitOutcome, TrackDescriptor};

/// Default budget for draining node events per scheduler tick.
pub const DEFAULT_EVENT_BUDGET: usize = 32;

/// The decoder/sink pair backing one datapath. Decoder is absent for
/// pass-through tracks (raw PCM, pre-demuxed text).
#[derive(Clone)]
pub struct TrackNodes {
    pub decoder: Option<NodeHandle>,
    pub sink: NodeHandle,
}

/// Instantiates the decoder/sink nodes a newly discovered track needs, once
/// `AddDataSource` has queried the source for its track list. Kept as a
/// trait (rather than a fixed constructor call) so a caller can swap in a
/// real codec/renderer registry without this crate knowing about it.
pub trait NodeFactory {
    /// Builds the decoder for `track`, or `None` if its `has_decoder` flag is
    /// already `false` or no decoder is registered for its format.
    fn create_decoder(&self, track: &TrackDescriptor) -> Option<NodeHandle>;

    /// Builds the sink (renderer) for `track`. Every track gets a sink.
    fn create_sink(&self, track: &TrackDescriptor) -> NodeHandle;
}

/// Live node table for one player session: a shared source plus one
/// decoder/sink pair per active track.
#[derive(Clone, Default)]
pub struct NodeHub {
    source: Option<NodeHandle>,
    tracks: HashMap<TrackId, TrackNodes>,
}

impl NodeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, source: NodeHandle) {
        self.source = Some(source);
    }

    pub fn source(&self) -> Option<&NodeHandle> {
        self.source.as_ref()
    }

    pub fn add_track(&mut self, track_id: TrackId, nodes: TrackNodes) {
        self.tracks.insert(track_id, nodes);
    }

    pub fn remove_track(&mut self, track_id: TrackId) -> Option<TrackNodes> {
        self.tracks.remove(&track_id)
    }

    pub fn track(&self, track_id: TrackId) -> Option<&TrackNodes> {
        self.tracks.get(&track_id)
    }

    /// Removes every track and the source, as `Reset` does.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.source = None;
    }

    /// Submits one fanout plan's commands to every node it targets,
    /// returning the outcome per (track, node) submission so the caller can
    /// count pending replies and retry on `WouldBlock`.
    ///
    /// `next_id` is called once per node submitted to, so each node sees a
    /// distinct command id even though they all originate from the same
    /// client command.
    pub fn submit_fanout(
        &self,
        fanout: &NodeFanout,
        mut next_id: impl FnMut() -> CommandId,
    ) -> SmallVec<[(TrackId, CommandId, SubmitOutcome); 4]> {
        let mut results = SmallVec::new();
        let track_ids: SmallVec<[TrackId; 4]> = match &fanout.scope {
            FanoutScope::AllActiveDatapaths => self.tracks.keys().copied().collect(),
            FanoutScope::Track(id) => SmallVec::from_slice(&[*id]),
        };

        for track_id in track_ids {
            let Some(nodes) = self.tracks.get(&track_id) else {
                continue;
            };
            if let Some(decoder) = &nodes.decoder {
                let id = next_id();
                let outcome = decoder.try_submit(&NodeCommand {
                    id,
                    kind: fanout.kind.clone(),
                });
                results.push((track_id, id, outcome));
            }
            let id = next_id();
            let outcome = nodes.sink.try_submit(&NodeCommand {
                id,
                kind: fanout.kind.clone(),
            });
            results.push((track_id, id, outcome));
        }

        results
    }

    /// Submits one node command directly to the source node (used by
    /// `AddDataSource`/`RemoveDataSource`, which operate before any
    /// datapath exists).
    pub fn submit_to_source(&self, cmd: NodeCommand) -> Result<SubmitOutcome> {
        let source = self.source.as_ref().ok_or_else(|| anyhow!("no source node attached"))?;
        Ok(source.try_submit(&cmd))
    }

    /// Drains events across the source and every track's nodes up to
    /// `budget`, tagging each with the track it came from (`None` for the
    /// source).
    pub fn drain_events(&self, budget: usize) -> Vec<(Option<TrackId>, NodeEvent)> {
        if budget == 0 {
            return Vec::new();
        }
        let mut remaining = budget;
        let mut out = Vec::with_capacity(budget);

        if let Some(source) = &self.source {
            if remaining > 0 {
                let drained = source.drain(remaining);
                remaining = remaining.saturating_sub(drained.len());
                out.extend(drained.into_iter().map(|ev| (None, ev)));
            }
        }

        for (track_id, nodes) in &self.tracks {
            if remaining == 0 {
                break;
            }
            if let Some(decoder) = &nodes.decoder {
                let drained = decoder.drain(remaining);
                remaining = remaining.saturating_sub(drained.len());
                out.extend(drained.into_iter().map(|ev| (Some(*track_id), ev)));
            }
            if remaining == 0 {
                break;
            }
            let drained = nodes.sink.drain(remaining);
            remaining = remaining.saturating_sub(drained.len());
            out.extend(drained.into_iter().map(|ev| (Some(*track_id), ev)));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_nodes::{MockDecoderNode, MockSinkNode, MockSourceNode};
    use node_abi::NodeCommandKind;
    use std::sync::Arc;

    #[test]
    fn submit_fanout_reaches_decoder_and_sink_for_every_active_track() {
        let mut hub = NodeHub::new();
        hub.add_track(
            0,
            TrackNodes {
                decoder: Some(Arc::new(MockDecoderNode::new())),
                sink: Arc::new(MockSinkNode::new()),
            },
        );
        hub.add_track(
            1,
            TrackNodes {
                decoder: None,
                sink: Arc::new(MockSinkNode::new()),
            },
        );

        let mut id = 0u64;
        let fanout = NodeFanout {
            scope: FanoutScope::AllActiveDatapaths,
            kind: NodeCommandKind::Start,
        };
        let results = hub.submit_fanout(&fanout, || {
            id += 1;
            id
        });
        // track 0 (decoder + sink) + track 1 (sink only) = 3 submissions.
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn submit_to_source_requires_a_source_to_be_set() {
        let hub = NodeHub::new();
        let result = hub.submit_to_source(NodeCommand {
            id: 1,
            kind: NodeCommandKind::Init,
        });
        assert!(result.is_err());
    }

    #[test]
    fn drain_events_tags_source_events_with_none() {
        let mut hub = NodeHub::new();
        let source = Arc::new(MockSourceNode::new());
        source.inject_end_of_data();
        hub.set_source(source);
        let events = hub.drain_events(DEFAULT_EVENT_BUDGET);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, None);
    }
}
