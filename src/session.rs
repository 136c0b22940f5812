//! Per-iteration session state.

use crate::client::{ClientError, SessionClientFactory};

/// Cookie jar and anti-forgery token belonging to exactly one iteration.
///
/// A session is opened at the start of an iteration and dropped when the
/// iteration ends, so neither cookies nor tokens leak into later iterations
/// or other virtual users.
pub struct Session {
    client: reqwest::Client,
    token: Option<String>,
}

impl Session {
    /// Opens a session with an empty cookie jar.
    pub fn open(
        factory: &SessionClientFactory,
        follow_redirects: bool,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: factory.build(follow_redirects)?,
            token: None,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }
}
