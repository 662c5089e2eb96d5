use std::collections::HashMap;

use super::types::{State, Task, TaskError, TaskResult};

pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    let state_transition_map: HashMap<State, Vec<State>> = {
        let mut map = HashMap::new();
        map.insert(
            State::Pending,
            vec![State::Running, State::Finished, State::Failed],
        );
        map.insert(State::Running, vec![State::Finished, State::Failed]);
        map.insert(State::Finished, vec![]);
        map.insert(State::Failed, vec![]);
        map
    };

    if let Some(valid_states) = state_transition_map.get(src) {
        valid_states.contains(dst)
    } else {
        false
    }
}

impl Task {
    /// Moves the task to `dst`, refusing anything that would go backwards.
    pub fn transition(&mut self, dst: State) -> TaskResult<()> {
        if !valid_state_transition(&self.state, &dst) {
            return Err(TaskError::InvalidStateTransition {
                from: self.state,
                to: dst,
            });
        }
        self.state = dst;
        Ok(())
    }
}
