// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deadline wrapper for calls into external collaborators.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Default deadline for a single collaborator call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Run a collaborator call, converting both failure and lateness into
/// typed errors.
pub async fn bounded<T, F>(name: &'static str, deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!("{} failed: {:#}", name, e);
            Err(Error::collaborator(name, e))
        }
        Err(_) => {
            warn!("{} exceeded {:?}", name, deadline);
            Err(Error::CollaboratorTimeout(name))
        }
    }
}
