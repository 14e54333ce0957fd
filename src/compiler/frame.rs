//! Update scheduling for nodes recorded by a build.
//!
//! A build only classifies cadences ([`UpdateRecord`]); the renderer owns the loop. It
//! advances a [`NodeFrame`] once per presented frame and once per render call, and asks
//! [`NodeFrame::should_update`] before refreshing each recorded node.

use std::collections::HashMap;

use tracing::trace;

use super::graph::NodeId;
use super::state::UpdateRecord;
use super::types::UpdateType;

#[derive(Clone, Debug, Default)]
pub struct NodeFrame {
    time: f64,
    delta_time: f64,
    frame_id: u64,
    render_id: u64,
    last_time: Option<f64>,
    // Keyed by (graph uid, node).
    frame_marks: HashMap<(u64, NodeId), u64>,
    render_marks: HashMap<(u64, NodeId), u64>,
}

impl NodeFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds since the first frame.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    /// Start a new frame at wall-clock `now` (seconds).
    pub fn next_frame(&mut self, now: f64) {
        let start = *self.last_time.get_or_insert(now);
        self.delta_time = (now - start).max(0.0);
        self.time += self.delta_time;
        self.last_time = Some(now);
        self.frame_id += 1;
    }

    /// Start a new render call within the current frame.
    pub fn next_render(&mut self) {
        self.render_id += 1;
    }

    /// Whether `record` is due now; marks it as updated when it is.
    ///
    /// `Frame` nodes run once per frame id, `Render` nodes once per render id, `Object`
    /// nodes on every call, and `None` nodes never.
    pub fn should_update(&mut self, record: &UpdateRecord) -> bool {
        let key = (record.graph, record.node);
        let due = match record.cadence {
            UpdateType::None => false,
            UpdateType::Object => true,
            UpdateType::Frame => mark(&mut self.frame_marks, key, self.frame_id),
            UpdateType::Render => mark(&mut self.render_marks, key, self.render_id),
        };
        if due {
            trace!(node = %record.node, cadence = ?record.cadence, "update due");
        }
        due
    }

    /// The subset of `records` due now, in order.
    pub fn due<'a>(&mut self, records: &'a [UpdateRecord]) -> Vec<&'a UpdateRecord> {
        records.iter().filter(|r| self.should_update(r)).collect()
    }
}

fn mark(marks: &mut HashMap<(u64, NodeId), u64>, key: (u64, NodeId), current: u64) -> bool {
    match marks.insert(key, current) {
        Some(previous) => previous != current,
        None => true,
    }
}
