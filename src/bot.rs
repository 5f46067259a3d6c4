//! The community chat-bot.  It hints at giveaway etiquette when a new
//! channel message looks like a giveaway, and when the original poster
//! mentions it in the thread it picks one of the people who replied.
//!
//! The chat platform and the language model are reached through the
//! [`ChatClient`] and [`Model`] traits; both are constructed once by the
//! caller and borrowed here.

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, info};

/// The giveaway channel the bot listens in.
pub(crate) const KEEP_IT_IN_THE_HERD: &str = "C0A2GBX3SKW";
pub(crate) const WEBSITE_URL: &str = "https://cowgilltrailcollective.com/";
pub(crate) const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
pub(crate) const DEFAULT_MODEL: &str = "qwen/qwen3-8b";

const ONLY_POSTER: &str = "Only the person who originally posted can select a user!";
const NO_OTHER_USERS: &str = "No other users found in this thread!";

/// What a message can be classified as.  The display text is what the
/// model is shown and what it answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub(crate) enum Classifier {
    #[strum(
        to_string = "An item that is being given away for free. Ensure the item is free, not being sold."
    )]
    Giveaway,
    #[strum(to_string = "Classification is not defined.")]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageClassified {
    classified: String,
}

/// Parse the model's `{"classified": "<description>"}` answer.
pub(crate) fn parse_classification(response: &str) -> Result<Classifier> {
    let err = |reason: String| Error::Classification {
        response: response.to_string(),
        reason,
    };
    let m: MessageClassified =
        serde_json::from_str(response.trim()).map_err(|e| err(e.to_string()))?;
    m.classified
        .parse()
        .map_err(|_| err("not one of the classification options".to_string()))
}

fn classification_prompt() -> String {
    let options: Vec<String> = Classifier::iter().map(|c| format!("'{}'", c)).collect();
    format!(
        "Classify this slack message. Classification options: ([{}]).",
        options.join(", ")
    )
}

/// JSON schema constraining the model's answer.
fn classification_schema() -> Value {
    let options: Vec<String> = Classifier::iter().map(|c| c.to_string()).collect();
    json!({
        "name": "MessageClassified",
        "strict": true,
        "schema": {
            "type": "object",
            "properties": { "classified": { "type": "string", "enum": options } },
            "required": ["classified"],
            "additionalProperties": false,
        },
    })
}

fn giveaway_hint(user: &str) -> String {
    format!(
        "<@{}> looks like you are giving something away! It is recommended to allow people \
         at least 24 hours to respond to the thread before determining who to select for the \
         giveaway. If you want, just tag me in the thread when you are ready to select someone \
         and I will choose someone randomly from the people who responded in the thread!",
        user
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EventKind {
    Message,
    AppMention,
}

/// The subset of a chat event the handlers read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ChatEvent {
    #[serde(rename = "type")]
    pub(crate) kind: EventKind,
    pub(crate) channel: String,
    pub(crate) user: String,
    #[serde(default)]
    pub(crate) text: String,
    /// Set when the event happened inside a thread.
    #[serde(default)]
    pub(crate) thread_ts: Option<String>,
    /// Author of the thread's first message.
    #[serde(default)]
    pub(crate) parent_user_id: Option<String>,
}

/// One message of a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ThreadMessage {
    #[serde(default)]
    pub(crate) user: Option<String>,
    #[serde(default)]
    pub(crate) bot_id: Option<String>,
}

/// A message the bot sends.  Ephemeral posts are only shown to `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum Post {
    Message {
        channel: String,
        thread_ts: Option<String>,
        text: String,
    },
    Ephemeral {
        channel: String,
        user: String,
        thread_ts: Option<String>,
        text: String,
    },
}

pub(crate) trait ChatClient {
    /// All messages of the thread rooted at `thread_ts`, including its root.
    fn thread_replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<ThreadMessage>>;
    fn post(&self, post: Post) -> Result<()>;
}

/// A hosted completion model answering in JSON.
pub(crate) trait Model {
    /// Complete `message` under the `system` prompt; `schema` is the
    /// JSON schema the answer must follow.
    fn complete(&self, system: &str, message: &str, schema: &Value) -> Result<String>;
}

pub(crate) fn channel_message(event: &ChatEvent) -> bool {
    event.thread_ts.is_none()
}

pub(crate) fn thread_message(event: &ChatEvent) -> bool {
    event.thread_ts.is_some()
}

pub(crate) fn only_channel(channel: &str) -> impl Fn(&ChatEvent) -> bool + '_ {
    move |event| event.channel == channel
}

/// Unique human authors of `messages` other than `poster`.
pub(crate) fn thread_participants<'m>(
    messages: &'m [ThreadMessage],
    poster: &str,
) -> BTreeSet<&'m str> {
    messages
        .iter()
        .filter(|m| m.bot_id.as_deref().map_or(true, str::is_empty))
        .filter_map(|m| m.user.as_deref())
        .filter(|&u| u != poster)
        .collect()
}

/// Event handlers for one channel.
pub(crate) struct Bot<'a> {
    chat: &'a dyn ChatClient,
    model: &'a dyn Model,
    channel: String,
}

impl<'a> Bot<'a> {
    pub(crate) fn new(
        chat: &'a dyn ChatClient,
        model: &'a dyn Model,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            model,
            channel: channel.into(),
        }
    }

    /// Dispatch `event`; events outside the channel are ignored.
    pub(crate) fn handle<R: Rng + ?Sized>(&self, event: &ChatEvent, rng: &mut R) -> Result<()> {
        let in_channel = only_channel(&self.channel);
        match event.kind {
            EventKind::Message if channel_message(event) && in_channel(event) => {
                self.giveaway_hint(event)
            }
            EventKind::AppMention if in_channel(event) && thread_message(event) => {
                self.select_participant(event, rng)
            }
            kind => {
                debug!("Ignoring {:?} in {}", kind, event.channel);
                Ok(())
            }
        }
    }

    pub(crate) fn classify(&self, text: &str) -> Result<Classifier> {
        debug!("Classifying message: {}", text);
        let response = self
            .model
            .complete(&classification_prompt(), text, &classification_schema())?;
        let class = parse_classification(&response)?;
        info!("Classified as {:?}", class);
        Ok(class)
    }

    fn giveaway_hint(&self, event: &ChatEvent) -> Result<()> {
        if self.classify(&event.text)? != Classifier::Giveaway {
            return Ok(());
        }
        self.chat.post(Post::Ephemeral {
            channel: event.channel.clone(),
            user: event.user.clone(),
            thread_ts: None,
            text: giveaway_hint(&event.user),
        })
    }

    fn select_participant<R: Rng + ?Sized>(&self, event: &ChatEvent, rng: &mut R) -> Result<()> {
        let thread_ts = match event.thread_ts.as_deref() {
            Some(ts) => ts,
            None => return Ok(()),
        };
        let poster = event
            .parent_user_id
            .as_deref()
            .ok_or_else(|| Error::Event("thread mention without parent_user_id".to_string()))?;
        if event.user != poster {
            return self.chat.post(Post::Ephemeral {
                channel: event.channel.clone(),
                user: event.user.clone(),
                thread_ts: Some(thread_ts.to_string()),
                text: ONLY_POSTER.to_string(),
            });
        }

        let replies = self.chat.thread_replies(&event.channel, thread_ts)?;
        let users: Vec<&str> = thread_participants(&replies, poster).into_iter().collect();
        let text = match users.choose(rng) {
            Some(selected) => {
                info!("Selected user: {}", selected);
                format!("<@{}> you have been selected!", selected)
            }
            None => NO_OTHER_USERS.to_string(),
        };
        self.chat.post(Post::Message {
            channel: event.channel.clone(),
            thread_ts: Some(thread_ts.to_string()),
            text,
        })
    }
}

/// An event plus the thread it refers to, as captured from the platform.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventDocument {
    pub(crate) event: ChatEvent,
    #[serde(default)]
    pub(crate) replies: Vec<ThreadMessage>,
}

/// Serves thread replies from a recorded document and collects posts
/// instead of sending them.
#[derive(Debug, Default)]
pub(crate) struct TranscriptChat {
    replies: Vec<ThreadMessage>,
    reads: Cell<usize>,
    posts: RefCell<Vec<Post>>,
}

impl TranscriptChat {
    pub(crate) fn new(replies: Vec<ThreadMessage>) -> Self {
        Self {
            replies,
            ..Default::default()
        }
    }

    pub(crate) fn posts(&self) -> Vec<Post> {
        self.posts.borrow().clone()
    }
}

impl ChatClient for TranscriptChat {
    fn thread_replies(&self, _channel: &str, _thread_ts: &str) -> Result<Vec<ThreadMessage>> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.replies.clone())
    }

    fn post(&self, post: Post) -> Result<()> {
        self.posts.borrow_mut().push(post);
        Ok(())
    }
}

/// OpenAI-style chat completions against OpenRouter.
pub(crate) struct OpenRouterModel {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    key: Option<String>,
}

impl std::fmt::Debug for OpenRouterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

impl OpenRouterModel {
    /// A missing `key` only fails once a completion is requested.
    pub(crate) fn new(client: reqwest::blocking::Client, key: Option<String>) -> Self {
        Self::with_endpoint(client, key, OPENROUTER_ENDPOINT)
    }

    pub(crate) fn with_endpoint(
        client: reqwest::blocking::Client,
        key: Option<String>,
        endpoint: &str,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            key,
        }
    }
}

impl Model for OpenRouterModel {
    fn complete(&self, system: &str, message: &str, schema: &Value) -> Result<String> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| Error::Model("no API key configured".to_string()))?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": message },
            ],
            "response_format": { "type": "json_schema", "json_schema": schema },
        });
        let url = format!("{}/chat/completions", self.endpoint);
        debug!("POST {} ({})", url, self.model);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .map_err(|e| Error::Model(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().map_err(|e| Error::Model(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Model(format!("{}: {}", status, text.trim())));
        }
        let completion: Completion = serde_json::from_str(&text)
            .map_err(|e| Error::Model(format!("malformed response: {}", e)))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Model("response has no choices".to_string()))
    }
}
