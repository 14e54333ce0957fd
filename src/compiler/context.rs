//! Lexically scoped key/value overrides visible to descendant nodes.

use std::collections::HashMap;

use super::graph::NodeId;

/// Identity of a context frame; the empty stack is [`FrameId::ROOT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u32);

impl FrameId {
    pub const ROOT: FrameId = FrameId(0);
}

#[derive(Clone, Debug)]
struct Frame {
    id: FrameId,
    values: Vec<(String, NodeId)>,
}

/// A resolved context value: the node and the stack depth of the frame that defined it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextHit {
    pub node: NodeId,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
    ids: HashMap<(FrameId, NodeId), FrameId>,
    next: u32,
}

impl ContextStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            ids: HashMap::new(),
            next: 1,
        }
    }

    pub fn current(&self) -> FrameId {
        self.frames.last().map_or(FrameId::ROOT, |f| f.id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enter the frame introduced by `context_node`.
    pub fn push(&mut self, context_node: NodeId, values: Vec<(String, NodeId)>) {
        let parent = self.current();
        let next = &mut self.next;
        let id = *self.ids.entry((parent, context_node)).or_insert_with(|| {
            let id = FrameId(*next);
            *next += 1;
            id
        });
        self.frames.push(Frame { id, values });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Innermost binding for `key`.
    pub fn lookup(&self, key: &str) -> Option<ContextHit> {
        self.frames.iter().enumerate().rev().find_map(|(depth, frame)| {
            frame
                .values
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, node)| ContextHit { node: *node, depth })
        })
    }

    /// Drop every frame at or above `depth`, returning them for [`ContextStack::restore`].
    pub fn truncate(&mut self, depth: usize) -> Vec<FrameSnapshot> {
        self.frames
            .split_off(depth.min(self.frames.len()))
            .into_iter()
            .map(FrameSnapshot)
            .collect()
    }

    pub fn restore(&mut self, frames: Vec<FrameSnapshot>) {
        self.frames.extend(frames.into_iter().map(|f| f.0));
    }
}

/// Frames removed by [`ContextStack::truncate`].
#[derive(Debug)]
pub struct FrameSnapshot(Frame);

#[cfg(test)]
mod tests {
    use super::*;

    const N: fn(usize) -> NodeId = NodeId::from_index;

    #[test]
    fn test_inner_frames_shadow_outer_ones() {
        let mut ctx = ContextStack::new();
        ctx.push(N(1), vec![("uv".to_string(), N(10))]);
        ctx.push(N(2), vec![("uv".to_string(), N(20))]);
        assert_eq!(ctx.lookup("uv"), Some(ContextHit { node: N(20), depth: 1 }));
        ctx.pop();
        assert_eq!(ctx.lookup("uv"), Some(ContextHit { node: N(10), depth: 0 }));
        ctx.pop();
        assert_eq!(ctx.lookup("uv"), None);
        assert_eq!(ctx.current(), FrameId::ROOT);
    }

    #[test]
    fn test_frame_ids_are_derived_from_parent_and_node() {
        let mut ctx = ContextStack::new();
        ctx.push(N(1), Vec::new());
        let first = ctx.current();
        ctx.pop();
        ctx.push(N(1), Vec::new());
        assert_eq!(ctx.current(), first);
        ctx.push(N(1), Vec::new());
        assert_ne!(ctx.current(), first);
    }

    #[test]
    fn test_truncate_and_restore() {
        let mut ctx = ContextStack::new();
        ctx.push(N(1), vec![("k".to_string(), N(10))]);
        ctx.push(N(2), vec![("k".to_string(), N(20))]);
        let saved = ctx.truncate(1);
        assert_eq!(ctx.lookup("k").map(|h| h.node), Some(N(10)));
        ctx.restore(saved);
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.lookup("k").map(|h| h.node), Some(N(20)));
    }
}
