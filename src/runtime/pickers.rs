//! Picker Hub - host-mediated native pickers with async responses.
//!
//! Sandboxed plugin content cannot open native dialogs itself. The hub
//! turns a picker need (choose a save directory, open files, choose a
//! download destination) into a `PickerRequestedEvent` for the presentation
//! layer and awaits the answer over a tokio oneshot channel.
//!
//! # Flow
//!
//! 1. A runtime task calls `request()` with the picker kind
//! 2. PickerHub sends a `PickerRequestedEvent` to the presentation layer
//! 3. The task awaits the oneshot receiver
//! 4. The presentation layer shows the dialog and calls `respond()`
//! 5. The task receives the chosen paths (or `None` when cancelled)
//!
//! Only one picker may be outstanding at a time; a second request while one
//! is pending fails with `ApiError::PickerInProgress`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::api::types::{ApiError, OperationId, PickerKind, PickerRequestedEvent};

/// Paths chosen by the user; `None` when the dialog was cancelled.
pub type PickerSelection = Option<Vec<PathBuf>>;

/// A pending picker request awaiting the user
struct PendingPicker {
    tx: oneshot::Sender<PickerSelection>,
}

type PendingMap = HashMap<OperationId, PendingPicker>;

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drops the pending entry when the requester goes away, answered or not.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    operation_id: OperationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if lock(self.pending).remove(&self.operation_id).is_some() {
            log::debug!("Picker request abandoned: operation_id={}", self.operation_id);
        }
    }
}

pub struct PickerHub {
    /// Outbound requests for the presentation layer
    events: mpsc::UnboundedSender<PickerRequestedEvent>,
    /// Pending pickers keyed by operation ID
    pending: Mutex<PendingMap>,
}

impl PickerHub {
    /// Create a hub and the receiver the presentation layer listens on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PickerRequestedEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                pending: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Ask the presentation layer to show a picker and await the selection.
    ///
    /// # Errors
    ///
    /// - `PickerInProgress` if another picker is still open
    /// - `IoError` if nobody is listening or the request was dropped unanswered
    pub async fn request(&self, kind: PickerKind) -> Result<PickerSelection, ApiError> {
        let operation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if !pending.is_empty() {
                log::debug!("Picker request rejected, another picker is open: kind={kind:?}");
                return Err(ApiError::PickerInProgress);
            }
            pending.insert(operation_id.clone(), PendingPicker { tx });
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            operation_id: operation_id.clone(),
        };

        let requested_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0);

        let event = PickerRequestedEvent {
            operation_id: operation_id.clone(),
            kind,
            requested_at_ms,
        };

        if let Err(e) = self.events.send(event) {
            return Err(ApiError::IoError {
                message: format!("Failed to deliver picker request: {e}"),
            });
        }

        log::debug!("Picker requested: operation_id={operation_id}");

        match rx.await {
            Ok(selection) => {
                log::debug!(
                    "Picker answered: operation_id={operation_id}, selected={}",
                    selection.as_ref().map(|paths| paths.len()).unwrap_or(0)
                );
                Ok(selection)
            }
            Err(_) => {
                log::warn!("Picker channel dropped without response: operation_id={operation_id}");
                Err(ApiError::IoError {
                    message: "Picker request was cancelled".to_string(),
                })
            }
        }
    }

    /// Answer a pending picker request.
    ///
    /// # Errors
    ///
    /// - `OperationNotFound` if no pending request exists for this ID
    /// - `OperationAlreadyResolved` if the requester already went away
    pub async fn respond(
        &self,
        operation_id: OperationId,
        selection: PickerSelection,
    ) -> Result<(), ApiError> {
        let pending_op = lock(&self.pending).remove(&operation_id);

        match pending_op {
            Some(pending) => {
                if pending.tx.send(selection).is_err() {
                    log::warn!(
                        "Failed to deliver picker selection (receiver dropped): operation_id={operation_id}"
                    );
                    return Err(ApiError::OperationAlreadyResolved { operation_id });
                }
                log::info!("Picker responded: operation_id={operation_id}");
                Ok(())
            }
            None => {
                log::warn!("Picker respond for unknown operation: operation_id={operation_id}");
                Err(ApiError::OperationNotFound { operation_id })
            }
        }
    }

    /// Whether a picker is currently waiting for the user.
    pub fn is_busy(&self) -> bool {
        !lock(&self.pending).is_empty()
    }
}
