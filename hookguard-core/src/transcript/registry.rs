use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "completed" | "done" => TaskStatus::Completed,
            "in_progress" | "in-progress" | "active" => TaskStatus::InProgress,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    pub subject: String,
    pub status: TaskStatus,
    pub created_at_turn: Option<u32>,
    pub completed_at_turn: Option<u32>,
}

/// Single registry keyed by task id, holding both in-progress and completed tasks
/// — the fix for the original bug where active tasks were keyed by subject and
/// completed tasks by id, so the two collections never actually referred to the
/// same task.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: IndexMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn insert(&mut self, task_id: String, subject: String) {
        self.entries.insert(
            task_id,
            TaskEntry {
                subject,
                status: TaskStatus::Pending,
                created_at_turn: None,
                completed_at_turn: None,
            },
        );
    }

    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(entry) = self.entries.get_mut(task_id) {
            entry.status = status;
        }
    }

    pub fn set_turns(&mut self, task_id: &str, created_at_turn: u32, completed_at_turn: u32) {
        if let Some(entry) = self.entries.get_mut(task_id) {
            entry.created_at_turn = Some(created_at_turn);
            entry.completed_at_turn = Some(completed_at_turn);
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskEntry> {
        self.entries.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskEntry)> {
        self.entries.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = (&String, &TaskEntry)> {
        self.entries.iter().filter(|(_, e)| e.status != TaskStatus::Completed)
    }

    pub fn completed(&self) -> impl Iterator<Item = (&String, &TaskEntry)> {
        self.entries.iter().filter(|(_, e)| e.status == TaskStatus::Completed)
    }
}
