// Legal lifecycle edges

use super::types::SequenceState;
use super::types::SequenceState::*;

/// Static table of legal lifecycle transitions.
///
/// Operator commands only ever use the `-ING` edges into `Stopped`/`Halted`.
/// The direct `Running -> Stopped` and `Running -> Halted` edges belong to the
/// execution loop (natural completion and step fault respectively).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionTable;

impl TransitionTable {
    /// Legal destinations from `from`
    pub fn targets(from: SequenceState) -> &'static [SequenceState] {
        match from {
            Idle => &[Running, Halting],
            Running => &[Paused, Stopping, Stopped, Halting, Halted],
            Paused => &[Running, Stopping, Halting],
            Stopping => &[Stopped, Halting],
            Stopped => &[Idle, Halting],
            Halting => &[Halted],
            Halted => &[Idle],
        }
    }

    pub fn allows(from: SequenceState, to: SequenceState) -> bool {
        Self::targets(from).contains(&to)
    }

    /// Shortest chain of legal transitions leading from `from` to `to`,
    /// excluding `from` itself. `None` when `to` is unreachable.
    pub fn path(from: SequenceState, to: SequenceState) -> Option<Vec<SequenceState>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut previous: [Option<SequenceState>; 8] = [None; 8];
        let mut queue = std::collections::VecDeque::from([from]);
        let mut visited = [false; 8];
        visited[usize::from(from.ordinal())] = true;

        while let Some(current) = queue.pop_front() {
            for &next in Self::targets(current) {
                let slot = usize::from(next.ordinal());
                if visited[slot] {
                    continue;
                }
                visited[slot] = true;
                previous[slot] = Some(current);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = current;
                    while cursor != from {
                        path.push(cursor);
                        cursor = previous[usize::from(cursor.ordinal())]?;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}
