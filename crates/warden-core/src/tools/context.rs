//! Per-invocation execution context.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SandboxSession;

/// Who is calling, with what rights, against which sandbox.
///
/// Built fresh for each invocation. Rate-limit windows live in the
/// dispatcher, keyed by `caller`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub request_id: String,
    pub caller: String,
    pub authenticated: bool,
    pub permissions: BTreeSet<String>,
    pub session: Option<SandboxSession>,
}

impl ExecutionContext {
    pub fn anonymous() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller: "anonymous".to_string(),
            authenticated: false,
            permissions: BTreeSet::new(),
            session: None,
        }
    }

    pub fn authenticated(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            authenticated: true,
            ..Self::anonymous()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_session(mut self, session: SandboxSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}
