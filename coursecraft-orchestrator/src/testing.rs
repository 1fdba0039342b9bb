//! Scripted content generator and canned payloads for unit tests

use crate::provider::{ContentGenerator, GeneratedContent, ProviderError};
use async_trait::async_trait;
use coursecraft_core::domain::provider::{ProviderRequest, ProviderTaskType};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted generator does for one request
pub enum Reply {
    Content(String),
    /// Content returned after a pause
    Delayed(Duration, String),
    Fail(ProviderError),
    Hang,
}

type Script = Box<dyn Fn(&ProviderRequest, usize) -> Reply + Send + Sync>;

/// Generator whose answers are computed by a closure
///
/// The closure receives the request and the zero-based call index.
pub struct ScriptedGenerator {
    id: String,
    script: Script,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

/// Keeps the count of running calls honest when a call is dropped mid-flight
struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGenerator {
    pub fn new(
        id: &str,
        script: impl Fn(&ProviderRequest, usize) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers every request with well-formed, high quality content
    pub fn happy(id: &str, chapters: usize) -> Arc<Self> {
        Self::new(id, move |request, _| Reply::Content(happy_reply(request, chapters)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Largest number of calls that were running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests_of(&self, task_type: ProviderTaskType) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_type == task_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedContent, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);

        match (self.script)(request, call) {
            Reply::Content(content) => Ok(GeneratedContent::new(content)),
            Reply::Delayed(pause, content) => {
                tokio::time::sleep(pause).await;
                Ok(GeneratedContent::new(content))
            }
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(ProviderError::Unavailable("hung".to_string()))
            }
        }
    }
}

/// Default answer for any task type
pub fn happy_reply(request: &ProviderRequest, chapters: usize) -> String {
    match request.task_type {
        ProviderTaskType::Structure => outline_json(chapters),
        ProviderTaskType::ChapterContent => good_chapter_json(&request.params.learning_objectives),
        ProviderTaskType::Assessment => quiz_json("Final check"),
    }
}

pub fn outline_json(chapters: usize) -> String {
    let chapters: Vec<_> = (1..=chapters)
        .map(|i| {
            json!({
                "title": format!("Part {}", i),
                "summary": "A short part.",
                "learning_objectives": [format!("Use loops in part {}", i)],
                "complexity": 1.5,
            })
        })
        .collect();
    json!({ "chapters": chapters }).to_string()
}

/// Short plain sentences mentioning every objective, with examples and a quiz
pub fn good_chapter_json(objectives: &[String]) -> String {
    let topic = objectives.join(". ");
    json!({
        "summary": "A short part.",
        "subchapters": [
            {
                "title": "Start",
                "content": format!("{}. We go step by step. You see a small case. Then you try it. It is fun to do.", topic),
                "examples": ["Add two and two to get four."],
                "key_points": ["Keep it short."],
                "estimated_minutes": 5
            },
            {
                "title": "Try it",
                "content": "Now you try. Take one step at a time. Check each step as you go.",
                "examples": ["Count from one to ten."],
                "key_points": ["Go slow."],
                "estimated_minutes": 5
            }
        ],
        "flashcards": [{ "front": "What is a loop?", "back": "A way to do a thing again." }],
        "quiz": serde_json::from_str::<serde_json::Value>(&quiz_json("Check")).unwrap(),
    })
    .to_string()
}

/// Mentions every objective but reads far above a beginner level
pub fn dense_chapter_json(objectives: &[String]) -> String {
    let topic = objectives.join(". ");
    json!({
        "subchapters": [
            {
                "title": "Considerations",
                "content": format!(
                    "{}. Notwithstanding epistemological considerations, computational irreducibility \
                     fundamentally characterizes nondeterministic probabilistic infrastructures \
                     institutionally and organizationally.",
                    topic
                ),
                "examples": ["Institutionalized characterization notwithstanding."],
            }
        ],
        "quiz": serde_json::from_str::<serde_json::Value>(&quiz_json("Check")).unwrap(),
    })
    .to_string()
}

pub fn quiz_json(title: &str) -> String {
    json!({
        "title": title,
        "questions": [
            { "prompt": "What is two plus two?", "question_type": "short_answer", "answer": "4", "bloom_level": "remember" },
            { "prompt": "Use a loop to count.", "question_type": "short_answer", "answer": "for i in 1..10", "bloom_level": "apply" },
            { "prompt": "Which loop fits best?", "question_type": "multiple_choice", "options": ["for", "while"], "answer": "for", "bloom_level": "analyze" }
        ]
    })
    .to_string()
}
