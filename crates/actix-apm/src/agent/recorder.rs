/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use super::{
    config::AgentConfig, error::ConfigError, Application, AttributeValue, NoticedError,
    Transaction, WebRequest,
};
use crate::middleware::{response::ResponseSnapshot, txn::Txn};
use crate::observe_transaction;
use crate::tools::prometheus::{TRANSACTION_DURATION, TRANSACTION_ERRORS};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::{
    cell::RefCell,
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use strum_macros::Display;
use tracing::{debug, error, info};
use uuid::Uuid;

const MAX_ATTRIBUTE_VALUE_BYTES: usize = 255;

/// Apdex satisfaction zone of a finished transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ApdexZone {
    #[serde(rename = "S")]
    #[strum(serialize = "S")]
    Satisfying,
    #[serde(rename = "T")]
    #[strum(serialize = "T")]
    Tolerating,
    #[serde(rename = "F")]
    #[strum(serialize = "F")]
    Frustrating,
}

impl ApdexZone {
    pub fn classify(duration: Duration, threshold: Duration, is_error: bool) -> Self {
        if is_error {
            ApdexZone::Frustrating
        } else if duration <= threshold {
            ApdexZone::Satisfying
        } else if duration <= threshold * 4 {
            ApdexZone::Tolerating
        } else {
            ApdexZone::Frustrating
        }
    }
}

/// A finalized transaction, as kept in the harvest buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTransaction {
    pub name: String,
    pub guid: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub apdex_zone: ApdexZone,
    pub errors: Vec<NoticedError>,
    pub agent_attributes: FxHashMap<String, AttributeValue>,
    pub user_attributes: FxHashMap<String, AttributeValue>,
}

impl RecordedTransaction {
    pub fn agent_attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.agent_attributes.get(key)
    }

    pub fn user_attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.user_attributes.get(key)
    }

    pub fn status(&self) -> Option<u16> {
        match self.agent_attributes.get("http.statusCode") {
            Some(AttributeValue::Int(status)) => u16::try_from(*status).ok(),
            _ => None,
        }
    }
}

struct Harvest {
    transactions: VecDeque<RecordedTransaction>,
    dropped: u64,
}

struct RecorderInner {
    config: AgentConfig,
    harvest: Mutex<Harvest>,
}

/// In-process monitoring engine.
///
/// Finished transactions are logged, observed in the Prometheus metrics and
/// kept in a bounded buffer (oldest dropped first) until harvested.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(config: AgentConfig) -> error_stack::Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.max_transaction_events.min(1024);
        Ok(Recorder {
            inner: Arc::new(RecorderInner {
                config,
                harvest: Mutex::new(Harvest {
                    transactions: VecDeque::with_capacity(capacity),
                    dropped: 0,
                }),
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Copies the transactions recorded so far.
    pub fn transactions(&self) -> Vec<RecordedTransaction> {
        self.inner.harvest.lock().transactions.iter().cloned().collect()
    }

    /// Takes the recorded transactions out of the buffer.
    pub fn harvest(&self) -> Vec<RecordedTransaction> {
        self.inner.harvest.lock().transactions.drain(..).collect()
    }

    /// Number of transactions evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.inner.harvest.lock().dropped
    }

    fn record(&self, transaction: RecordedTransaction) {
        log_transaction(&transaction);

        let status = transaction
            .status()
            .map(|status| status.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        observe_transaction!(
            transaction.name.as_str(),
            status.as_str(),
            transaction.apdex_zone.to_string().as_str(),
            transaction.duration
        );
        for err in &transaction.errors {
            TRANSACTION_ERRORS
                .with_label_values(&[transaction.name.as_str(), err.class.as_str()])
                .inc();
        }

        let max_events = self.inner.config.max_transaction_events;
        let mut harvest = self.inner.harvest.lock();
        if max_events == 0 {
            harvest.dropped += 1;
            return;
        }
        if harvest.transactions.len() >= max_events {
            harvest.transactions.pop_front();
            harvest.dropped += 1;
        }
        harvest.transactions.push_back(transaction);
    }
}

impl Application for Recorder {
    fn start_transaction(&self, name: &str) -> Option<Txn> {
        if !self.inner.config.enabled {
            debug!(tag = "[TRANSACTION]", transaction = %name, "agent disabled, not recording");
            return None;
        }

        Some(Txn::new(RecorderTransaction {
            recorder: self.clone(),
            state: RefCell::new(TransactionState::new(name)),
        }))
    }
}

fn log_transaction(transaction: &RecordedTransaction) {
    let status = transaction.status().unwrap_or_default();
    let latency = format!("{:?}ms", transaction.duration.as_millis());
    if transaction.errors.is_empty() {
        info!(tag = "[TRANSACTION]", transaction = %transaction.name, guid = %transaction.guid, response_status = status, apdex_zone = %transaction.apdex_zone, latency = latency);
    } else {
        let errors: Vec<&str> = transaction
            .errors
            .iter()
            .map(|err| err.message.as_str())
            .collect();
        error!(tag = "[TRANSACTION - ERROR]", transaction = %transaction.name, guid = %transaction.guid, response_status = status, apdex_zone = %transaction.apdex_zone, errors = format!("{:?}", errors), latency = latency);
    }
}

struct TransactionState {
    name: String,
    guid: Uuid,
    start: Instant,
    timestamp: DateTime<Utc>,
    errors: Vec<NoticedError>,
    user_attributes: FxHashMap<String, AttributeValue>,
    request: Option<WebRequest>,
    response: Option<ResponseSnapshot>,
    ended: bool,
}

impl TransactionState {
    fn new(name: &str) -> Self {
        TransactionState {
            name: name.to_string(),
            guid: Uuid::new_v4(),
            start: Instant::now(),
            timestamp: Utc::now(),
            errors: Vec::new(),
            user_attributes: FxHashMap::default(),
            request: None,
            response: None,
            ended: false,
        }
    }

    fn finish(&mut self, config: &AgentConfig) -> RecordedTransaction {
        let duration = self.start.elapsed();
        let mut agent_attributes = FxHashMap::default();

        if let Some(request) = self.request.take() {
            agent_attributes.insert("request.method".to_string(), request.method.into());
            agent_attributes.insert("request.uri".to_string(), request.uri.into());
            if let Some(host) = request.host {
                agent_attributes.insert("request.headers.host".to_string(), host.into());
            }
            if let Some(user_agent) = request.user_agent {
                agent_attributes.insert("request.headers.userAgent".to_string(), user_agent.into());
            }
            if let Some(request_id) = request.request_id {
                agent_attributes.insert("request.id".to_string(), request_id.into());
            }
        }

        if let Some(response) = self.response.take() {
            let status = response.status.as_u16();
            agent_attributes.insert("httpResponseCode".to_string(), status.to_string().into());
            agent_attributes.insert("http.statusCode".to_string(), u32::from(status).into());
            if let Some(content_type) = response.content_type {
                agent_attributes.insert("response.headers.contentType".to_string(), content_type.into());
            }

            // A noticed error already describes the failure; the status only
            // counts when nothing else did.
            if self.errors.is_empty()
                && status >= 400
                && !config.ignore_status_codes.contains(&status)
            {
                self.errors.push(
                    NoticedError::new(response.status.canonical_reason().unwrap_or("Unknown"))
                        .with_class(status.to_string())
                        .with_status(response.status),
                );
            }
        }

        RecordedTransaction {
            name: std::mem::take(&mut self.name),
            guid: self.guid,
            timestamp: self.timestamp,
            duration,
            apdex_zone: ApdexZone::classify(duration, config.apdex_threshold(), !self.errors.is_empty()),
            errors: std::mem::take(&mut self.errors),
            agent_attributes,
            user_attributes: std::mem::take(&mut self.user_attributes),
        }
    }
}

struct RecorderTransaction {
    recorder: Recorder,
    state: RefCell<TransactionState>,
}

impl Transaction for RecorderTransaction {
    fn set_name(&self, name: &str) {
        let mut state = self.state.borrow_mut();
        if !state.ended {
            state.name = name.to_string();
        }
    }

    fn notice_error(&self, error: NoticedError) {
        let mut state = self.state.borrow_mut();
        if state.ended {
            return;
        }
        let ignored = error
            .status
            .map(|status| self.recorder.config().ignore_status_codes.contains(&status))
            .unwrap_or(false);
        if !ignored {
            state.errors.push(error);
        }
    }

    fn add_attribute(&self, key: &str, value: AttributeValue) {
        let mut state = self.state.borrow_mut();
        if state.ended {
            return;
        }
        let max_user_attributes = self.recorder.config().max_user_attributes;
        if state.user_attributes.len() >= max_user_attributes
            && !state.user_attributes.contains_key(key)
        {
            debug!(tag = "[TRANSACTION]", attribute = %key, "user attribute limit reached, dropping");
            return;
        }
        state
            .user_attributes
            .insert(key.to_string(), truncate_value(value));
    }

    fn set_web_request(&self, request: WebRequest) {
        let mut state = self.state.borrow_mut();
        if !state.ended {
            state.request = Some(request);
        }
    }

    fn set_web_response(&self, response: ResponseSnapshot) {
        let mut state = self.state.borrow_mut();
        if !state.ended {
            state.response = Some(response);
        }
    }

    fn end(&self) {
        let recorded = {
            let mut state = self.state.borrow_mut();
            if state.ended {
                return;
            }
            state.ended = true;
            state.finish(self.recorder.config())
        };
        self.recorder.record(recorded);
    }
}

fn truncate_value(value: AttributeValue) -> AttributeValue {
    match value {
        AttributeValue::String(mut value) if value.len() > MAX_ATTRIBUTE_VALUE_BYTES => {
            let mut end = MAX_ATTRIBUTE_VALUE_BYTES;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            value.truncate(end);
            AttributeValue::String(value)
        }
        value => value,
    }
}
