//! Frame graph: pass ordering from declared buffer dependencies.

use std::collections::{BTreeSet, HashMap};

use render_api::{LightingBackend, ParameterBlock};

use crate::ambient::AmbientState;
use crate::error::CompositorError;
use crate::pool::{BufferId, BufferPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    Read,
    Write,
    ReadWrite,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        matches!(self, ResourceUsage::Write | ResourceUsage::ReadWrite)
    }
    pub fn is_read(&self) -> bool {
        matches!(self, ResourceUsage::Read | ResourceUsage::ReadWrite)
    }
}

/// Everything a pass may touch while it runs.
pub struct FrameContext<'a> {
    pub backend: &'a mut dyn LightingBackend,
    pub pool: &'a mut BufferPool,
    pub params: &'a mut ParameterBlock,
    pub ambient: &'a mut AmbientState,
}

pub trait FrameNode {
    fn name(&self) -> &str;
    fn run(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError>;
}

pub struct FrameGraph<'n> {
    nodes: Vec<Box<dyn FrameNode + 'n>>,
    node_usage: Vec<Vec<(BufferId, ResourceUsage)>>,
    edges: Vec<(NodeId, NodeId)>,
}

impl Default for FrameGraph<'_> {
    fn default() -> Self {
        Self { nodes: Vec::new(), node_usage: Vec::new(), edges: Vec::new() }
    }
}

impl<'n> FrameGraph<'n> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Box<dyn FrameNode + 'n>, usage: Vec<(BufferId, ResourceUsage)>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.node_usage.push(usage);
        id
    }

    /// Extra ordering constraint not expressed through buffers.
    pub fn add_edge(&mut self, before: NodeId, after: NodeId) {
        self.edges.push((before, after));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges implied by insertion order and buffer usage: read-after-write,
    /// write-after-read and write-after-write.
    fn inferred_edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        let mut last_writer: HashMap<BufferId, usize> = HashMap::new();
        let mut readers: HashMap<BufferId, Vec<usize>> = HashMap::new();
        for (index, usage) in self.node_usage.iter().enumerate() {
            for &(buffer, u) in usage {
                if u.is_read() {
                    if let Some(&writer) = last_writer.get(&buffer) {
                        edges.push((writer, index));
                    }
                }
            }
            for &(buffer, u) in usage {
                if u.is_write() {
                    if let Some(&writer) = last_writer.get(&buffer) {
                        edges.push((writer, index));
                    }
                    for &reader in readers.get(&buffer).map(Vec::as_slice).unwrap_or(&[]) {
                        if reader != index {
                            edges.push((reader, index));
                        }
                    }
                    last_writer.insert(buffer, index);
                    readers.remove(&buffer);
                }
            }
            for &(buffer, u) in usage {
                if u == ResourceUsage::Read {
                    readers.entry(buffer).or_default().push(index);
                }
            }
        }
        edges
    }

    /// Topological order; among ready nodes the earliest added runs first.
    pub fn order(&self) -> Result<Vec<usize>, CompositorError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        let explicit = self.edges.iter().map(|&(NodeId(a), NodeId(b))| (a, b));
        for (a, b) in self.inferred_edges().into_iter().chain(explicit) {
            if a < n && b < n && a != b {
                in_degree[b] += 1;
                out_edges[a].push(b);
            }
        }
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(u) = ready.pop_first() {
            order.push(u);
            for &v in &out_edges[u] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.insert(v);
                }
            }
        }
        if order.len() != n {
            return Err(CompositorError::GraphCycle);
        }
        Ok(order)
    }

    pub fn execute(&self, ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
        for index in self.order()? {
            let node = &self.nodes[index];
            log::trace!("penumbra pass: {}", node.name());
            node.run(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Probe<'a> {
        name: &'static str,
        log: &'a RefCell<Vec<&'static str>>,
    }

    impl FrameNode for Probe<'_> {
        fn name(&self) -> &str {
            self.name
        }
        fn run(&self, _ctx: &mut FrameContext<'_>) -> Result<(), CompositorError> {
            self.log.borrow_mut().push(self.name);
            Ok(())
        }
    }

    fn recorder<'a>(name: &'static str, log: &'a RefCell<Vec<&'static str>>) -> Box<dyn FrameNode + 'a> {
        Box::new(Probe { name, log })
    }

    fn run(graph: &FrameGraph<'_>) -> Result<(), CompositorError> {
        let mut backend = crate::software::SoftwareBackend::new();
        let mut pool = BufferPool::new();
        let mut params = ParameterBlock::new();
        let mut ambient = AmbientState::default();
        let mut ctx = FrameContext {
            backend: &mut backend,
            pool: &mut pool,
            params: &mut params,
            ambient: &mut ambient,
        };
        graph.execute(&mut ctx)
    }

    #[test]
    fn explicit_edge_reorders_independent_nodes() {
        let log = RefCell::new(Vec::new());
        let mut graph = FrameGraph::new();
        let a = graph.add_node(recorder("a", &log), vec![(BufferId::Obstacle, ResourceUsage::Write)]);
        let b = graph.add_node(recorder("b", &log), vec![(BufferId::Normals, ResourceUsage::Write)]);
        graph.add_edge(b, a);
        run(&graph).unwrap();
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn declared_dependencies_chain_per_emitter_stages() {
        let log = RefCell::new(Vec::new());
        let mut graph = FrameGraph::new();
        graph.add_node(recorder("normals", &log), vec![(BufferId::Normals, ResourceUsage::Write)]);
        for (color, shade, blend) in [("c1", "s1", "b1"), ("c2", "s2", "b2")] {
            graph.add_node(recorder(color, &log), vec![(BufferId::EmitterColor, ResourceUsage::Write)]);
            graph.add_node(
                recorder(shade, &log),
                vec![(BufferId::Normals, ResourceUsage::Read), (BufferId::EmitterShading, ResourceUsage::Write)],
            );
            graph.add_node(
                recorder(blend, &log),
                vec![
                    (BufferId::EmitterColor, ResourceUsage::Read),
                    (BufferId::EmitterShading, ResourceUsage::Read),
                    (BufferId::LightSource, ResourceUsage::ReadWrite),
                ],
            );
        }
        let order = graph.order().unwrap();
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        // second colour write waits for the first blend to read the scratch buffer
        assert!(pos(3) < pos(4));
        assert!(pos(1) < pos(3) && pos(2) < pos(3));
        assert!(pos(0) < pos(2));
        run(&graph).unwrap();
        assert_eq!(*log.borrow(), vec!["normals", "c1", "s1", "b1", "c2", "s2", "b2"]);
    }

    #[test]
    fn cycle_is_reported() {
        let log = RefCell::new(Vec::new());
        let mut graph = FrameGraph::new();
        let a = graph.add_node(recorder("a", &log), vec![(BufferId::Obstacle, ResourceUsage::Write)]);
        let b = graph.add_node(recorder("b", &log), vec![(BufferId::Obstacle, ResourceUsage::Read)]);
        graph.add_edge(b, a);
        assert!(matches!(run(&graph), Err(CompositorError::GraphCycle)));
        assert!(log.borrow().is_empty());
    }
}
