// Per-project cache of topics discovered through listing or created through
// the API. A project is listed from the broker once; later creates append to
// its entry.
use crate::api::types::Topic;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TopicCache {
    projects: Mutex<HashMap<String, Vec<Topic>>>,
}

impl TopicCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: &str) -> Option<Vec<Topic>> {
        self.projects.lock().get(project_id).cloned()
    }

    /// Stores a freshly listed project unless another request got there
    /// first, and returns whichever entry is cached.
    pub fn fill(&self, project_id: &str, topics: Vec<Topic>) -> Vec<Topic> {
        self.projects
            .lock()
            .entry(project_id.to_string())
            .or_insert(topics)
            .clone()
    }

    /// Records a created topic. Projects that were never listed stay
    /// uncached so the next listing sees the full broker state.
    pub fn add(&self, topic: Topic) {
        let mut projects = self.projects.lock();
        if let Some(topics) = projects.get_mut(&topic.project_id)
            && !topics.iter().any(|existing| existing.name == topic.name)
        {
            topics.push(topic);
        }
    }
}
