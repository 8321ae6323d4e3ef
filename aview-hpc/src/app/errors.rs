// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const AUTHENTICATION_TIMEOUT: &str = "authentication_timeout";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const CONNECTION_RESET: &str = "connection_reset";
    pub const DNS_NOT_FOUND: &str = "dns_not_found";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const NOT_FOUND: &str = "not_found";
    pub const NO_MODEL_REFERENCE: &str = "no_model_reference";
    pub const MALFORMED_CONTROL_FILE: &str = "malformed_control_file";
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const UNPARSEABLE_JOB_TABLE: &str = "unparseable_job_table";
    pub const UNPARSEABLE_LISTING: &str = "unparseable_listing";
    pub const ALREADY_SUBMITTED: &str = "already_submitted";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    /// DNS failure, dropped or reset connection, authentication timeout.
    Connectivity,
    /// Credentials rejected by the server.
    Authentication,
    /// Remote output did not match the expected grammar.
    ProtocolParse,
    /// Operation not allowed in the current session state.
    State,
    /// A remote command reported an error.
    RemoteOperation,
    InvalidArgument,
    NotFound,
    Local,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Local, codes::LOCAL_ERROR, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT, message)
    }

    /// Error for a remote command that wrote to stderr.
    pub fn remote_stderr(command: &str, stderr: &str) -> Self {
        Self::with_message(
            AppErrorKind::RemoteOperation,
            codes::REMOTE_ERROR,
            format!("remote command failed: {command}"),
        )
        .with_context(stderr.trim().to_string())
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Connection-level failures that may succeed when tried again.
    pub fn is_transient(&self) -> bool {
        self.kind == AppErrorKind::Connectivity
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
