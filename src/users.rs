use crate::error::LimiterError;
use crate::zones::Tier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An account as the limiter sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub admin: bool,
    pub subscriber: bool,
}

impl User {
    pub fn tier(&self) -> Tier {
        if self.subscriber {
            Tier::Premium
        } else {
            Tier::Authed
        }
    }
}

/// `[[users]]` entry of the limits file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub token: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub subscriber: bool,
}

/// Resolves bearer tokens to accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_by_token(&self, token: &str) -> Result<Option<User>, LimiterError>;
}

/// Directory backed by the users listed in the limits file.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    by_token: HashMap<String, User>,
}

impl StaticUserDirectory {
    pub fn new(records: &[UserRecord]) -> Self {
        let by_token = records
            .iter()
            .map(|record| {
                (
                    record.token.clone(),
                    User {
                        id: record.id,
                        admin: record.admin,
                        subscriber: record.subscriber,
                    },
                )
            })
            .collect();
        Self { by_token }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn fetch_by_token(&self, token: &str) -> Result<Option<User>, LimiterError> {
        Ok(self.by_token.get(token).cloned())
    }
}
