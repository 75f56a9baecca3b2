use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A unit of map or reduce work (§4.4). Map tasks carry the raw input chunk;
/// reduce tasks carry the grouped values for one output key. Both forms
/// share a `task_id` and serialized function blob, so `TaskGroup` doesn't
/// need to know which phase it is tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: u64,
    pub payload: TaskPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskPayload {
    Map { items: Vec<Vec<u8>> },
    Reduce { out_key: Vec<u8>, values: Vec<Vec<u8>> },
}

/// Tracks one phase's tasks through pending → assigned → completed (§4.4
/// `TaskGroup`). The three maps partition the task id space: every id
/// appears in exactly one of them (§8 invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGroup {
    pending: HashMap<u64, Task>,
    assigned: HashMap<u64, (String, Task)>,
    completed: HashMap<u64, Task>,
    next_id: u64,
    /// Maps a reduce out-key to the pending/assigned task id collecting its
    /// intermediate values, so repeated `append_value` calls for the same
    /// key land on one task (§4.4 phase C: "append interVal to
    /// reduceTasks.pending[outKey]").
    #[serde(default)]
    out_key_to_task: HashMap<Vec<u8>, u64>,
}

impl TaskGroup {
    pub fn new() -> Self {
        TaskGroup::default()
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let next_id = tasks.iter().map(|t| t.task_id + 1).max().unwrap_or(0);
        let pending = tasks.into_iter().map(|t| (t.task_id, t)).collect();
        TaskGroup {
            pending,
            assigned: HashMap::new(),
            completed: HashMap::new(),
            next_id,
            out_key_to_task: HashMap::new(),
        }
    }

    /// Appends `value` to the reduce task collecting `out_key`'s
    /// intermediate values, creating a fresh pending task if this is the
    /// first value seen for that key (§4.4 phase C map-completion step).
    pub fn append_value(&mut self, out_key: Vec<u8>, value: Vec<u8>) {
        if let Some(&task_id) = self.out_key_to_task.get(&out_key) {
            if let Some(task) = self.pending.get_mut(&task_id) {
                if let TaskPayload::Reduce { values, .. } = &mut task.payload {
                    values.push(value);
                    return;
                }
            }
            // Task already assigned/completed under an earlier job instance;
            // treat this as a fresh key instead of losing the value.
        }
        let task_id = self.next_id;
        self.next_id += 1;
        self.out_key_to_task.insert(out_key.clone(), task_id);
        self.pending.insert(
            task_id,
            Task {
                task_id,
                payload: TaskPayload::Reduce {
                    out_key,
                    values: vec![value],
                },
            },
        );
    }

    /// True if any task remains pending or assigned (§4.4 `any`).
    pub fn any(&self) -> bool {
        !self.pending.is_empty() || !self.assigned.is_empty()
    }

    /// True once every task has completed (§4.4 `none`, the phase's exit
    /// condition).
    pub fn none(&self) -> bool {
        self.pending.is_empty() && self.assigned.is_empty()
    }

    pub fn pop_pending(&mut self) -> Option<Task> {
        let id = *self.pending.keys().next()?;
        self.pending.remove(&id)
    }

    pub fn mark_assigned(&mut self, follower: String, task: Task) {
        self.assigned.insert(task.task_id, (follower, task));
    }

    /// Moves a task from assigned to completed, failing if it was never
    /// handed out (§4.4 `report_task` edge case: a follower reports a task
    /// this group does not recognize).
    pub fn set_as_complete(&mut self, task_id: u64) -> Option<Task> {
        let (_, task) = self.assigned.remove(&task_id)?;
        self.completed.insert(task_id, task.clone());
        Some(task)
    }

    pub fn completed_tasks(&self) -> impl Iterator<Item = &Task> {
        self.completed.values()
    }

    /// Clears all state, the fresh-phase transition (§4.4 `reset`).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.assigned.clear();
        self.completed.clear();
    }

    /// Moves every assigned task back to pending without touching
    /// completed, the preemption-recovery path used when a follower
    /// disappears mid-task or the Master restarts from a checkpoint that
    /// predates completion (§4.4, §4.5 "follower preemption").
    pub fn reset_assigned_to_pending(&mut self) {
        for (id, (_, task)) in self.assigned.drain() {
            self.pending.insert(id, task);
        }
    }

    /// Serializes to the checkpoint format the DHT backup path stores
    /// (§4.4 `dump`/`load`, the Master's own progress checkpoint described
    /// in §7 "checkpoint/recovery via DHT backup").
    pub fn dump(&self) -> Vec<u8> {
        bincode::serialize(self).expect("TaskGroup fields are all plain-old-data")
    }

    pub fn load(bytes: &[u8]) -> Result<TaskGroup, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64) -> Task {
        Task {
            task_id: id,
            payload: TaskPayload::Map { items: vec![] },
        }
    }

    #[test]
    fn fresh_group_from_tasks_is_any_not_none() {
        let group = TaskGroup::from_tasks(vec![task(1), task(2)]);
        assert!(group.any());
        assert!(!group.none());
    }

    #[test]
    fn assign_then_complete_moves_through_every_partition() {
        let mut group = TaskGroup::from_tasks(vec![task(1)]);
        let t = group.pop_pending().unwrap();
        assert!(group.any());
        group.mark_assigned("f1".into(), t);
        assert!(group.set_as_complete(1).is_some());
        assert!(group.none());
        assert_eq!(group.completed_tasks().count(), 1);
    }

    #[test]
    fn set_as_complete_on_unknown_task_returns_none() {
        let mut group = TaskGroup::from_tasks(vec![task(1)]);
        assert!(group.set_as_complete(99).is_none());
    }

    #[test]
    fn reset_assigned_to_pending_preserves_completed() {
        let mut group = TaskGroup::from_tasks(vec![task(1), task(2)]);
        let t1 = group.pop_pending().unwrap();
        group.mark_assigned("f1".into(), t1);
        group.set_as_complete(1);

        let t2 = group.pop_pending().unwrap();
        group.mark_assigned("f2".into(), t2);
        group.reset_assigned_to_pending();

        assert_eq!(group.completed_tasks().count(), 1);
        assert!(group.any());
    }

    #[test]
    fn dump_load_round_trips_state() {
        let mut group = TaskGroup::from_tasks(vec![task(1), task(2)]);
        let t = group.pop_pending().unwrap();
        group.mark_assigned("f1".into(), t);
        group.set_as_complete(1);

        let bytes = group.dump();
        let restored = TaskGroup::load(&bytes).unwrap();
        assert_eq!(restored.completed_tasks().count(), 1);
        assert!(restored.any());
    }
}
