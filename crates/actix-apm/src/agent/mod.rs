/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

//! The monitoring engine the middleware reports into.
//!
//! [`Application`] and [`Transaction`] are the only surface the middleware
//! consumes. [`recorder::Recorder`] is an in-process implementation that keeps
//! finished transactions in memory, logs them and feeds the Prometheus metrics.

pub mod config;
pub mod error;
pub mod recorder;

use crate::middleware::{response::ResponseSnapshot, txn::Txn};
use actix_http::StatusCode;
use serde::Serialize;
use std::fmt::Display;

/// Process-wide monitoring engine.
///
/// Returning `None` from [`Application::start_transaction`] means the engine is
/// disabled; the middleware then behaves as if it were not mounted.
pub trait Application: Send + Sync {
    fn start_transaction(&self, name: &str) -> Option<Txn>;
}

/// Per-request monitoring state.
///
/// Every operation must be a silent no-op once [`Transaction::end`] has run.
pub trait Transaction {
    fn set_name(&self, name: &str);
    fn notice_error(&self, error: NoticedError);
    fn add_attribute(&self, key: &str, value: AttributeValue);
    fn set_web_request(&self, request: WebRequest);
    fn set_web_response(&self, response: ResponseSnapshot);
    fn end(&self);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(value) => write!(f, "{value}"),
            AttributeValue::Int(value) => write!(f, "{value}"),
            AttributeValue::Float(value) => write!(f, "{value}"),
            AttributeValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// An error attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoticedError {
    pub message: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl NoticedError {
    pub fn new(message: impl Into<String>) -> Self {
        NoticedError {
            message: message.into(),
            class: "Error".to_string(),
            status: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }
}

impl From<&str> for NoticedError {
    fn from(message: &str) -> Self {
        NoticedError::new(message)
    }
}

impl From<String> for NoticedError {
    fn from(message: String) -> Self {
        NoticedError::new(message)
    }
}

/// Request metadata recorded once, when the transaction starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebRequest {
    pub method: String,
    pub uri: String,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}
