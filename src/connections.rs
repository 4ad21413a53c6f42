//! Connection and port bookkeeping. Single source of truth for port identity:
//! combiner input ports are named `input-<n>` and are kept gap-free by
//! reindexing whenever an input connection goes away.

use regex::Regex;

use crate::state::{Connection, InputPort, WorkspaceState};

/// Parse the numeric suffix out of a combiner input-port id.
pub fn input_index(port_id: &str) -> Option<usize> {
    let re = Regex::new(r"^input-(\d+)$").ok()?;
    re.captures(port_id)?.get(1)?.as_str().parse().ok()
}

pub fn input_port_id(index: usize) -> String {
    format!("input-{index}")
}

impl WorkspaceState {
    /// Create a connection, or return the id of the identical one that already
    /// exists. When the target is a combiner input port, the combiner's port
    /// list grows to cover the id before the call returns.
    pub fn create_connection(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> String {
        if let Some(existing) = self.connections.iter().find(|c| {
            c.from_node == from_node
                && c.from_port == from_port
                && c.to_node == to_node
                && c.to_port == to_port
        }) {
            return existing.id.clone();
        }

        if let Some(index) = input_index(to_port) {
            if let Some(combiner) = self.combiner_mut(to_node) {
                let id = input_port_id(index);
                if !combiner.input_ports.iter().any(|p| p.id == id) {
                    combiner.input_ports.push(InputPort { id });
                }
            }
        }

        let id = self.next_connection_id();
        let color = self.connections.len();
        self.connections.push(Connection {
            id: id.clone(),
            from_node: from_node.to_string(),
            from_port: from_port.to_string(),
            to_node: to_node.to_string(),
            to_port: to_port.to_string(),
            color,
            animated: true,
        });
        id
    }

    /// Remove a connection by id. Deleting an edge into a combiner input
    /// renumbers that combiner's remaining inputs so no gap survives. Unknown
    /// ids are a no-op.
    pub fn delete_connection(&mut self, id: &str) {
        let removed = match self.connections.iter().position(|c| c.id == id) {
            Some(index) => self.connections.remove(index),
            None => return,
        };
        if input_index(&removed.to_port).is_some() {
            let combiner_id = removed.to_node;
            self.reindex_combiner_inputs(&combiner_id);
        }
    }

    /// Remove a combiner and, atomically, every connection touching it.
    pub fn delete_combiner(&mut self, id: &str) {
        self.combiners.retain(|c| c.id != id);
        self.connections
            .retain(|c| c.from_node != id && c.to_node != id);
    }

    /// Renumber a combiner's input connections to `input-0..input-(k-1)`,
    /// ordered by their current numeric suffix, and rebuild the port list to
    /// match. Stable and idempotent.
    pub fn reindex_combiner_inputs(&mut self, combiner_id: &str) {
        let mut inputs: Vec<(usize, usize)> = self
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.to_node == combiner_id)
            .filter_map(|(i, c)| input_index(&c.to_port).map(|n| (i, n)))
            .collect();
        inputs.sort_by_key(|&(_, suffix)| suffix);

        for (slot, &(conn_index, _)) in inputs.iter().enumerate() {
            self.connections[conn_index].to_port = input_port_id(slot);
        }
        if let Some(combiner) = self.combiner_mut(combiner_id) {
            combiner.input_ports = (0..inputs.len())
                .map(|i| InputPort {
                    id: input_port_id(i),
                })
                .collect();
        }
    }

    /// Defensive sweep run before every draw cycle: renumber every combiner so
    /// direct port mutations elsewhere cannot leave the display inconsistent
    /// for more than one frame.
    pub fn normalize_ports(&mut self) {
        let ids: Vec<String> = self.combiners.iter().map(|c| c.id.clone()).collect();
        for id in ids {
            self.reindex_combiner_inputs(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CombinerKind, WorkspaceState};
    use iced::Point;
    use pretty_assertions::assert_eq;

    fn state_with_combiner() -> (WorkspaceState, String) {
        let mut state = WorkspaceState::new("ws");
        let id = state.add_combiner(CombinerKind::Merge, Point::new(100.0, 100.0));
        (state, id)
    }

    #[test]
    fn input_index_parses_only_well_formed_ids() {
        assert_eq!(input_index("input-0"), Some(0));
        assert_eq!(input_index("input-17"), Some(17));
        assert_eq!(input_index("input-"), None);
        assert_eq!(input_index("output"), None);
        assert_eq!(input_index("input-2x"), None);
    }

    #[test]
    fn create_connection_is_idempotent() {
        let (mut state, combiner) = state_with_combiner();
        let first = state.create_connection("t1", "output", &combiner, "input-0");
        let second = state.create_connection("t1", "output", &combiner, "input-0");
        assert_eq!(first, second);
        assert_eq!(state.connections.len(), 1);
    }

    #[test]
    fn create_connection_grows_combiner_ports() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t1", "output", &combiner, "input-0");
        state.create_connection("t2", "output", &combiner, "input-1");
        let ports: Vec<&str> = state
            .combiner(&combiner)
            .unwrap()
            .input_ports
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ports, vec!["input-0", "input-1"]);
    }

    #[test]
    fn delete_reindexes_remaining_inputs() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t0", "output", &combiner, "input-0");
        let middle = state.create_connection("t3", "output", &combiner, "input-3");
        state.create_connection("t7", "output", &combiner, "input-7");

        state.delete_connection(&middle);

        let ports: Vec<&str> = state
            .combiner(&combiner)
            .unwrap()
            .input_ports
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ports, vec!["input-0", "input-1"]);

        let mut targets: Vec<(&str, &str)> = state
            .connections
            .iter()
            .map(|c| (c.from_node.as_str(), c.to_port.as_str()))
            .collect();
        targets.sort();
        assert_eq!(targets, vec![("t0", "input-0"), ("t7", "input-1")]);
    }

    #[test]
    fn reindex_is_idempotent() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t0", "output", &combiner, "input-0");
        state.create_connection("t3", "output", &combiner, "input-3");
        state.reindex_combiner_inputs(&combiner);
        let after_first = state.connections.clone();
        let ports_first = state.combiner(&combiner).unwrap().input_ports.clone();

        state.reindex_combiner_inputs(&combiner);
        assert_eq!(state.connections, after_first);
        assert_eq!(state.combiner(&combiner).unwrap().input_ports, ports_first);
    }

    #[test]
    fn deleting_combiner_leaves_no_dangling_edges() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t1", "output", &combiner, "input-0");
        state.create_connection(&combiner, "output", "agent-a", "input");
        state.create_connection("t1", "output", "t2", "input");

        state.delete_combiner(&combiner);

        assert!(state.combiner(&combiner).is_none());
        assert!(
            state
                .connections
                .iter()
                .all(|c| c.from_node != combiner && c.to_node != combiner)
        );
        // Unrelated edge survives.
        assert_eq!(state.connections.len(), 1);
    }

    #[test]
    fn deleting_unknown_ids_is_a_no_op() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t1", "output", &combiner, "input-0");
        state.delete_connection("conn-999");
        state.delete_combiner("combiner-999");
        assert_eq!(state.connections.len(), 1);
        assert_eq!(state.combiners.len(), 1);
    }

    #[test]
    fn normalize_sweep_collapses_gaps() {
        let (mut state, combiner) = state_with_combiner();
        state.create_connection("t2", "output", &combiner, "input-2");
        state.create_connection("t5", "output", &combiner, "input-5");
        state.normalize_ports();

        let mut targets: Vec<(&str, &str)> = state
            .connections
            .iter()
            .map(|c| (c.from_node.as_str(), c.to_port.as_str()))
            .collect();
        targets.sort();
        assert_eq!(targets, vec![("t2", "input-0"), ("t5", "input-1")]);
    }
}
