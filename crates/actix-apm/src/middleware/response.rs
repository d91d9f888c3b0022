/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use actix_http::{header::CONTENT_TYPE, StatusCode};
use actix_web::dev::ServiceResponse;
use once_cell::unsync::OnceCell;

/// Status and content type of the response sent for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub content_type: Option<String>,
}

impl Default for ResponseSnapshot {
    fn default() -> Self {
        ResponseSnapshot {
            status: StatusCode::OK,
            content_type: None,
        }
    }
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode) -> Self {
        ResponseSnapshot {
            status,
            content_type: None,
        }
    }

    pub fn from_response<B>(response: &ServiceResponse<B>) -> Self {
        ResponseSnapshot {
            status: response.status(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// Captures the response of one request, once.
///
/// The first observed response wins; later ones leave the snapshot untouched.
#[derive(Debug, Default)]
pub struct ResponseObserver {
    snapshot: OnceCell<ResponseSnapshot>,
}

impl ResponseObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe<B>(&self, response: &ServiceResponse<B>) -> &ResponseSnapshot {
        self.snapshot
            .get_or_init(|| ResponseSnapshot::from_response(response))
    }

    /// The captured snapshot, if anything was written.
    pub fn written(&self) -> Option<&ResponseSnapshot> {
        self.snapshot.get()
    }

    /// The captured snapshot, or `200 OK` if nothing was written.
    pub fn snapshot(&self) -> ResponseSnapshot {
        self.snapshot.get().cloned().unwrap_or_default()
    }

    /// The captured snapshot reported with the status the transaction was
    /// classified with, which differs from the written one for structured errors.
    pub fn classified(&self, status: StatusCode) -> ResponseSnapshot {
        ResponseSnapshot {
            status,
            ..self.snapshot()
        }
    }
}
