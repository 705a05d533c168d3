// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `graph` module implements the typed-port DSP block diagram.
//!
//! A [`Diagram`] holds a bounded set of [`Block`]s and the [`Connection`]s between their ports.
//! Ports are typed by [`PortKind`]; a connection is only legal between an output and an input of
//! the same kind and capacity. Validation checks every block for a processor, every edge for
//! sane endpoints, and the whole graph for acyclicity via Kahn's algorithm, whose topological
//! order also drives per-frame execution.

use crate::errors::{
    buffer_size_mismatch_error, invalid_argument_error, invalid_diagram_error,
    invalid_state_error, not_found_error, Result,
};

/// The role a block plays in the diagram.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Oscillator,
    Filter,
    Envelope,
    Mixer,
    Effect,
    Analyzer,
    Synthesizer,
    Custom,
}

/// The typed payload a port carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// Audio samples, `f32`.
    Audio,
    /// Fundamental frequency track, `f64`.
    F0,
    /// Spectral envelope frames, `f64`.
    Spectrum,
    /// Aperiodicity frames, `f64`.
    Aperiodicity,
    /// Opaque parameter words.
    Parameters,
    /// Control values, `i32`.
    Control,
}

impl PortKind {
    /// The size of one element of this kind in bytes.
    pub fn elem_size(&self) -> usize {
        match *self {
            PortKind::Audio => std::mem::size_of::<f32>(),
            PortKind::F0 | PortKind::Spectrum | PortKind::Aperiodicity => {
                std::mem::size_of::<f64>()
            }
            PortKind::Parameters => std::mem::size_of::<u64>(),
            PortKind::Control => std::mem::size_of::<i32>(),
        }
    }
}

/// The direction of a port relative to its block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDir {
    Input,
    Output,
}

/// A typed, buffered endpoint on a block.
pub struct Port {
    kind: PortKind,
    dir: PortDir,
    buf: Vec<u8>,
    capacity: usize,
    connected: bool,
}

impl Port {
    fn new(kind: PortKind, dir: PortDir, capacity: usize) -> Port {
        Port { kind, dir, buf: vec![0u8; capacity * kind.elem_size()], capacity, connected: false }
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn dir(&self) -> PortDir {
        self.dir
    }

    /// Buffer capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The port buffer as audio samples. Fails on a differently-typed port.
    pub fn audio(&self) -> Result<Vec<f32>> {
        if self.kind != PortKind::Audio {
            return invalid_argument_error("port does not carry audio");
        }
        Ok(self
            .buf
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Writes audio samples into the port buffer.
    pub fn write_audio(&mut self, samples: &[f32]) -> Result<()> {
        if self.kind != PortKind::Audio {
            return invalid_argument_error("port does not carry audio");
        }
        if samples.len() > self.capacity {
            return buffer_size_mismatch_error("samples exceed port capacity");
        }
        for (i, &s) in samples.iter().enumerate() {
            self.buf[i * 4..i * 4 + 4].copy_from_slice(&s.to_ne_bytes());
        }
        Ok(())
    }

    /// The control values in the port buffer.
    pub fn control(&self) -> Result<Vec<i32>> {
        if self.kind != PortKind::Control {
            return invalid_argument_error("port does not carry control values");
        }
        Ok(self
            .buf
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Writes control values into the port buffer.
    pub fn write_control(&mut self, values: &[i32]) -> Result<()> {
        if self.kind != PortKind::Control {
            return invalid_argument_error("port does not carry control values");
        }
        if values.len() > self.capacity {
            return buffer_size_mismatch_error("values exceed port capacity");
        }
        for (i, &v) in values.iter().enumerate() {
            self.buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
        }
        Ok(())
    }

    /// Raw access to the port bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// The processing hooks of a block.
///
/// `process` reads the block's input port buffers and fills its output port buffers for
/// `frames` frames. `init` and `cleanup` bracket a diagram run.
pub trait BlockProcessor: Send {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, inputs: &mut [Port], outputs: &mut [Port], frames: usize)
        -> Result<()>;

    fn cleanup(&mut self) {}
}

/// A block id, unique within one diagram for its lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

/// A connection id, unique within one diagram for its lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u32);

/// A specification for one port of a new block.
#[derive(Copy, Clone, Debug)]
pub struct PortSpec {
    pub kind: PortKind,
    /// Buffer capacity in frames.
    pub capacity: usize,
}

/// A description of a block to add to a diagram.
pub struct BlockDesc {
    pub name: String,
    pub kind: BlockKind,
    /// The processing callback. A block without one fails validation.
    pub processor: Option<Box<dyn BlockProcessor>>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

/// A block instance inside a diagram.
pub struct Block {
    id: BlockId,
    name: String,
    kind: BlockKind,
    processor: Option<Box<dyn BlockProcessor>>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    active: bool,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input_mut(&mut self, port: usize) -> Result<&mut Port> {
        match self.inputs.get_mut(port) {
            Some(port) => Ok(port),
            None => not_found_error("input port index out of range"),
        }
    }

    pub fn output_mut(&mut self, port: usize) -> Result<&mut Port> {
        match self.outputs.get_mut(port) {
            Some(port) => Ok(port),
            None => not_found_error("output port index out of range"),
        }
    }
}

/// An edge from a source output port to a destination input port.
#[derive(Copy, Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    src_block: BlockId,
    src_port: usize,
    dst_block: BlockId,
    dst_port: usize,
    /// Transfer size in frames; equals the source port's capacity.
    frames: usize,
    active: bool,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn src(&self) -> (BlockId, usize) {
        (self.src_block, self.src_port)
    }

    pub fn dst(&self) -> (BlockId, usize) {
        (self.dst_block, self.dst_port)
    }
}

/// Limits on the size of a diagram.
#[derive(Copy, Clone, Debug)]
pub struct DiagramOptions {
    pub max_blocks: usize,
    pub max_connections: usize,
}

impl Default for DiagramOptions {
    fn default() -> Self {
        DiagramOptions { max_blocks: 64, max_connections: 256 }
    }
}

/// A bounded set of blocks and connections with a build/validate/run lifecycle.
pub struct Diagram {
    blocks: Vec<Block>,
    connections: Vec<Connection>,
    next_block_id: u32,
    next_connection_id: u32,
    opts: DiagramOptions,
    validated: bool,
    built: bool,
}

impl Diagram {
    pub fn new(opts: DiagramOptions) -> Diagram {
        Diagram {
            blocks: Vec::new(),
            connections: Vec::new(),
            next_block_id: 0,
            next_connection_id: 0,
            opts,
            validated: false,
            built: false,
        }
    }

    /// Adds a block and assigns it the next block id.
    pub fn add_block(&mut self, desc: BlockDesc) -> Result<BlockId> {
        if self.blocks.len() >= self.opts.max_blocks {
            return invalid_state_error("diagram block limit reached");
        }

        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;

        self.blocks.push(Block {
            id,
            name: desc.name,
            kind: desc.kind,
            processor: desc.processor,
            inputs: desc
                .inputs
                .iter()
                .map(|spec| Port::new(spec.kind, PortDir::Input, spec.capacity))
                .collect(),
            outputs: desc
                .outputs
                .iter()
                .map(|spec| Port::new(spec.kind, PortDir::Output, spec.capacity))
                .collect(),
            active: true,
        });

        self.touch();
        Ok(id)
    }

    /// Removes a block, disconnecting every edge that references it first.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        let index = self.block_index(id)?;

        self.connections.retain(|conn| conn.src_block != id && conn.dst_block != id);
        self.blocks.remove(index);

        // Re-derive input connectivity after the retain.
        self.refresh_connected_flags();
        self.touch();
        Ok(())
    }

    /// Connects an output port of `src` to an input port of `dst`.
    pub fn connect(
        &mut self,
        src: BlockId,
        src_port: usize,
        dst: BlockId,
        dst_port: usize,
    ) -> Result<ConnectionId> {
        if self.connections.len() >= self.opts.max_connections {
            return invalid_state_error("diagram connection limit reached");
        }

        let src_index = self.block_index(src)?;
        let dst_index = self.block_index(dst)?;

        let (src_kind, src_capacity) = {
            let port = match self.blocks[src_index].outputs.get(src_port) {
                Some(port) => port,
                None => return not_found_error("source port index out of range"),
            };
            (port.kind, port.capacity)
        };

        let (dst_kind, dst_capacity, dst_connected) = {
            let port = match self.blocks[dst_index].inputs.get(dst_port) {
                Some(port) => port,
                None => return not_found_error("destination port index out of range"),
            };
            (port.kind, port.capacity, port.connected)
        };

        if src_kind != dst_kind {
            return invalid_argument_error("port kinds disagree");
        }
        if dst_connected {
            return invalid_state_error("input port already has a source");
        }
        if src_capacity != dst_capacity {
            return buffer_size_mismatch_error("port capacities disagree");
        }

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        self.connections.push(Connection {
            id,
            src_block: src,
            src_port,
            dst_block: dst,
            dst_port,
            frames: src_capacity,
            active: true,
        });

        self.blocks[src_index].outputs[src_port].connected = true;
        self.blocks[dst_index].inputs[dst_port].connected = true;

        self.touch();
        Ok(id)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        let index = match self.connections.iter().position(|conn| conn.id == id) {
            Some(index) => index,
            None => return not_found_error("no such connection"),
        };

        self.connections.remove(index);
        self.refresh_connected_flags();
        self.touch();
        Ok(())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        Ok(&self.blocks[self.block_index(id)?])
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        let index = self.block_index(id)?;
        Ok(&mut self.blocks[index])
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Validates the diagram: every block has a processor, every connection joins existing
    /// same-kind ports, and the connection graph is acyclic.
    pub fn validate(&mut self) -> Result<()> {
        for block in &self.blocks {
            if block.processor.is_none() {
                return invalid_diagram_error("block has no processing callback");
            }
        }

        for conn in &self.connections {
            let src = self.block_index(conn.src_block)?;
            let dst = self.block_index(conn.dst_block)?;

            let src_port = match self.blocks[src].outputs.get(conn.src_port) {
                Some(port) => port,
                None => return invalid_diagram_error("connection source port vanished"),
            };
            let dst_port = match self.blocks[dst].inputs.get(conn.dst_port) {
                Some(port) => port,
                None => return invalid_diagram_error("connection destination port vanished"),
            };

            if src_port.kind != dst_port.kind {
                return invalid_diagram_error("connection joins differently-typed ports");
            }
        }

        self.topo_order()?;

        self.validated = true;
        Ok(())
    }

    /// Builds the diagram for execution. Requires a successful [`validate`](Diagram::validate).
    pub fn build(&mut self) -> Result<()> {
        if !self.validated {
            return invalid_state_error("diagram must be validated before building");
        }
        self.built = true;
        Ok(())
    }

    /// Calls every block's `init` hook. Requires a built diagram.
    pub fn initialize(&mut self) -> Result<()> {
        if !self.built {
            return invalid_state_error("diagram must be built before initialization");
        }

        for block in &mut self.blocks {
            if let Some(processor) = block.processor.as_mut() {
                processor.init()?;
            }
        }
        Ok(())
    }

    /// Calls every block's `cleanup` hook.
    pub fn cleanup(&mut self) {
        for block in &mut self.blocks {
            if let Some(processor) = block.processor.as_mut() {
                processor.cleanup();
            }
        }
    }

    /// The execution order of the diagram: Kahn's topological order over the connection graph.
    pub fn execution_order(&self) -> Result<Vec<BlockId>> {
        self.topo_order()
    }

    /// Runs one processing pass of `frames` frames: every block in execution order, then every
    /// outgoing edge transfer.
    pub fn process(&mut self, frames: usize) -> Result<()> {
        if !self.built {
            return invalid_state_error("diagram must be built before processing");
        }

        let order = match self.topo_order() {
            Ok(order) => order,
            Err(err) => return Err(err),
        };

        for id in order {
            let index = self.block_index(id)?;

            {
                let block = &mut self.blocks[index];
                if !block.active {
                    continue;
                }

                let Block { processor, inputs, outputs, .. } = block;
                match processor.as_mut() {
                    Some(processor) => processor.process(inputs, outputs, frames)?,
                    None => return invalid_diagram_error("block has no processing callback"),
                }
            }

            self.transfer_from(id, frames)?;
        }

        Ok(())
    }

    /// Copies `frames` elements across every active outgoing edge of `src`.
    fn transfer_from(&mut self, src: BlockId, frames: usize) -> Result<()> {
        let edges: Vec<Connection> = self
            .connections
            .iter()
            .filter(|conn| conn.active && conn.src_block == src)
            .copied()
            .collect();

        for conn in edges {
            let src_index = self.block_index(conn.src_block)?;
            let dst_index = self.block_index(conn.dst_block)?;

            let elem_size = {
                let port = &self.blocks[src_index].outputs[conn.src_port];
                if frames > port.capacity {
                    return buffer_size_mismatch_error("frame count exceeds port capacity");
                }
                port.kind.elem_size()
            };

            {
                let dst_port = &self.blocks[dst_index].inputs[conn.dst_port];
                if dst_port.capacity
                    != self.blocks[src_index].outputs[conn.src_port].capacity
                {
                    return buffer_size_mismatch_error("port capacities disagree");
                }
            }

            let bytes = frames * elem_size;

            if src_index == dst_index {
                // A self-edge would have failed the cycle check; guard anyway.
                return invalid_diagram_error("connection loops back to its own block");
            }

            let (first, second) = if src_index < dst_index {
                let (head, tail) = self.blocks.split_at_mut(dst_index);
                (&head[src_index], &mut tail[0])
            }
            else {
                let (head, tail) = self.blocks.split_at_mut(src_index);
                (&tail[0], &mut head[dst_index])
            };

            let src_buf = &first.outputs[conn.src_port].buf[..bytes];
            second.inputs[conn.dst_port].buf[..bytes].copy_from_slice(src_buf);
        }

        Ok(())
    }

    fn block_index(&self, id: BlockId) -> Result<usize> {
        match self.blocks.iter().position(|block| block.id == id) {
            Some(index) => Ok(index),
            None => not_found_error("no such block"),
        }
    }

    fn refresh_connected_flags(&mut self) {
        for block in &mut self.blocks {
            for port in block.inputs.iter_mut().chain(block.outputs.iter_mut()) {
                port.connected = false;
            }
        }

        let edges: Vec<(BlockId, usize, BlockId, usize)> = self
            .connections
            .iter()
            .map(|conn| (conn.src_block, conn.src_port, conn.dst_block, conn.dst_port))
            .collect();

        for (src, src_port, dst, dst_port) in edges {
            if let Ok(index) = self.block_index(src) {
                self.blocks[index].outputs[src_port].connected = true;
            }
            if let Ok(index) = self.block_index(dst) {
                self.blocks[index].inputs[dst_port].connected = true;
            }
        }
    }

    /// Kahn's algorithm over the connection graph. Fails when the in-degree vector does not
    /// drain, i.e. the diagram contains a cycle.
    fn topo_order(&self) -> Result<Vec<BlockId>> {
        let n = self.blocks.len();

        let mut in_degree = vec![0usize; n];
        for conn in self.connections.iter().filter(|conn| conn.active) {
            let dst = self.block_index(conn.dst_block)?;
            in_degree[dst] += 1;
        }

        let mut ready: std::collections::VecDeque<usize> =
            (0..n).filter(|&index| in_degree[index] == 0).collect();
        let mut order = Vec::with_capacity(n);

        // Drain in FIFO order so the order is stable for equal-depth blocks.
        while let Some(index) = ready.pop_front() {
            order.push(self.blocks[index].id);

            for conn in self.connections.iter().filter(|conn| conn.active) {
                if conn.src_block != self.blocks[index].id {
                    continue;
                }

                let dst = self.block_index(conn.dst_block)?;
                in_degree[dst] -= 1;
                if in_degree[dst] == 0 {
                    ready.push_back(dst);
                }
            }
        }

        if order.len() != n {
            return invalid_diagram_error("diagram contains a cycle");
        }

        Ok(order)
    }

    // A topology edit invalidates validation but leaves `built` alone: `process` re-derives the
    // execution order every pass, so a newly-introduced cycle surfaces as an invalid diagram.
    fn touch(&mut self) {
        self.validated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Copies its single audio input to its single audio output, adding a constant.
    struct Offset(f32);

    impl BlockProcessor for Offset {
        fn process(
            &mut self,
            inputs: &mut [Port],
            outputs: &mut [Port],
            frames: usize,
        ) -> Result<()> {
            let samples: Vec<f32> = if inputs.is_empty() {
                vec![0.0; frames]
            }
            else {
                inputs[0].audio()?
            };

            let shifted: Vec<f32> =
                samples.iter().take(frames).map(|&s| s + self.0).collect();
            outputs[0].write_audio(&shifted)
        }
    }

    /// Terminal block that swallows its input.
    struct Sink;

    impl BlockProcessor for Sink {
        fn process(
            &mut self,
            _inputs: &mut [Port],
            _outputs: &mut [Port],
            _frames: usize,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn audio_port(capacity: usize) -> PortSpec {
        PortSpec { kind: PortKind::Audio, capacity }
    }

    fn source_desc(name: &str, offset: f32, capacity: usize) -> BlockDesc {
        BlockDesc {
            name: name.to_string(),
            kind: BlockKind::Oscillator,
            processor: Some(Box::new(Offset(offset))),
            inputs: vec![],
            outputs: vec![audio_port(capacity)],
        }
    }

    fn stage_desc(name: &str, offset: f32, capacity: usize) -> BlockDesc {
        BlockDesc {
            name: name.to_string(),
            kind: BlockKind::Effect,
            processor: Some(Box::new(Offset(offset))),
            inputs: vec![audio_port(capacity)],
            outputs: vec![audio_port(capacity)],
        }
    }

    #[test]
    fn verify_chain_order_and_transfer() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 1.0, 256)).unwrap();
        let b = diagram.add_block(stage_desc("b", 10.0, 256)).unwrap();
        let c = diagram.add_block(stage_desc("c", 100.0, 256)).unwrap();

        diagram.connect(a, 0, b, 0).unwrap();
        diagram.connect(b, 0, c, 0).unwrap();

        diagram.validate().unwrap();
        diagram.build().unwrap();
        diagram.initialize().unwrap();

        assert_eq!(diagram.execution_order().unwrap(), vec![a, b, c]);

        diagram.process(256).unwrap();

        // a emits 1.0, b adds 10.0, c adds 100.0.
        let out = diagram.block(c).unwrap().outputs()[0].audio().unwrap();
        assert_eq!(out.len(), 256);
        assert!(out.iter().all(|&s| s == 111.0));

        diagram.cleanup();
    }

    #[test]
    fn verify_cycle_fails_validation_and_process() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(stage_desc("a", 0.0, 256)).unwrap();
        let b = diagram.add_block(stage_desc("b", 0.0, 256)).unwrap();
        let c = diagram.add_block(stage_desc("c", 0.0, 256)).unwrap();

        diagram.connect(a, 0, b, 0).unwrap();
        diagram.connect(b, 0, c, 0).unwrap();
        diagram.validate().unwrap();
        diagram.build().unwrap();

        // Close the loop: c -> a. Validation must now fail and processing must refuse.
        diagram.connect(c, 0, a, 0).unwrap();

        let err = diagram.validate().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidDiagram);

        assert_eq!(
            diagram.process(256).unwrap_err().kind(),
            crate::errors::ErrorKind::InvalidDiagram
        );
        assert_eq!(
            diagram.build().unwrap_err().kind(),
            crate::errors::ErrorKind::InvalidState
        );
    }

    #[test]
    fn verify_typed_ports_must_match() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 0.0, 64)).unwrap();
        let b = diagram
            .add_block(BlockDesc {
                name: "ctl".to_string(),
                kind: BlockKind::Custom,
                processor: Some(Box::new(Sink)),
                inputs: vec![PortSpec { kind: PortKind::Control, capacity: 64 }],
                outputs: vec![],
            })
            .unwrap();

        let err = diagram.connect(a, 0, b, 0).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidArgument);
    }

    #[test]
    fn verify_capacity_mismatch_rejected() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 0.0, 64)).unwrap();
        let b = diagram.add_block(stage_desc("b", 0.0, 128)).unwrap();

        let err = diagram.connect(a, 0, b, 0).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::BufferSizeMismatch);
    }

    #[test]
    fn verify_single_source_per_input() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 0.0, 64)).unwrap();
        let b = diagram.add_block(source_desc("b", 0.0, 64)).unwrap();
        let c = diagram.add_block(stage_desc("c", 0.0, 64)).unwrap();

        diagram.connect(a, 0, c, 0).unwrap();
        let err = diagram.connect(b, 0, c, 0).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidState);
    }

    #[test]
    fn verify_missing_processor_fails_validation() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        diagram
            .add_block(BlockDesc {
                name: "hollow".to_string(),
                kind: BlockKind::Custom,
                processor: None,
                inputs: vec![],
                outputs: vec![],
            })
            .unwrap();

        let err = diagram.validate().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidDiagram);
    }

    #[test]
    fn verify_remove_block_disconnects_edges() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 0.0, 64)).unwrap();
        let b = diagram.add_block(stage_desc("b", 0.0, 64)).unwrap();
        let c = diagram.add_block(stage_desc("c", 0.0, 64)).unwrap();

        diagram.connect(a, 0, b, 0).unwrap();
        diagram.connect(b, 0, c, 0).unwrap();
        assert_eq!(diagram.num_connections(), 2);

        diagram.remove_block(b).unwrap();
        assert_eq!(diagram.num_blocks(), 2);
        assert_eq!(diagram.num_connections(), 0);

        // c's input is free again.
        diagram.connect(a, 0, c, 0).unwrap();
    }

    #[test]
    fn verify_block_limit() {
        let mut diagram =
            Diagram::new(DiagramOptions { max_blocks: 1, max_connections: 4 });

        diagram.add_block(source_desc("a", 0.0, 8)).unwrap();
        let err = diagram.add_block(source_desc("b", 0.0, 8)).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidState);
    }

    #[test]
    fn verify_edge_transfers_exact_bytes() {
        let mut diagram = Diagram::new(DiagramOptions::default());

        let a = diagram.add_block(source_desc("a", 2.5, 256)).unwrap();
        let b = diagram.add_block(stage_desc("b", 0.0, 256)).unwrap();
        diagram.connect(a, 0, b, 0).unwrap();

        diagram.validate().unwrap();
        diagram.build().unwrap();

        // Process fewer frames than capacity: only that prefix is transferred.
        diagram.process(16).unwrap();

        let received = diagram.block(b).unwrap().inputs()[0].audio().unwrap();
        assert!(received[..16].iter().all(|&s| s == 2.5));
        assert!(received[16..].iter().all(|&s| s == 0.0));
    }
}
