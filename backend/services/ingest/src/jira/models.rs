use serde::{Deserialize, Serialize};

/// A project as listed by `GET {base}/project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraProject {
    /// Numeric id, sent as a string.
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
}

/// One page of `GET {base}/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraSearchPage {
    #[serde(default)]
    pub start_at: u32,
    #[serde(default)]
    pub max_results: u32,
    pub total: u32,
    #[serde(default)]
    pub issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    pub fields: JiraIssueFields,
    #[serde(default)]
    pub changelog: JiraChangelog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraIssueFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<JiraNamed>,
    #[serde(default)]
    pub priority: Option<JiraNamed>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub resolutiondate: Option<String>,
    /// Logged work in seconds.
    #[serde(default)]
    pub timespent: Option<i64>,
    #[serde(default)]
    pub creator: Option<JiraUser>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
}

/// `status` and `priority` objects; only the label is replicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraNamed {
    pub name: String,
}

/// A user reference inside an issue. Server deployments send `name`,
/// Cloud sends `accountId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

impl JiraUser {
    /// The login the surrogate id is derived from.
    pub fn username(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.account_id.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraChangelog {
    #[serde(default)]
    pub histories: Vec<JiraHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraHistory {
    pub created: String,
    #[serde(default)]
    pub items: Vec<JiraHistoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraHistoryItem {
    pub field: String,
    #[serde(default)]
    pub from_string: Option<String>,
    #[serde(default)]
    pub to_string: Option<String>,
}
