//! REST payloads consumed by the API client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMember {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: MemberRole,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub created_at: String,
    #[serde(default)]
    pub members: Vec<FamilyMember>,
}

/// Entry of `/me/families`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyFamily {
    pub family_id: String,
    pub family_name: String,
    pub role: MemberRole,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageText {
    pub text: String,
}

/// Shape of a REST error body: `detail` is a string or a list of field errors.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Text(String),
    Fields(Vec<FieldError>),
}

#[derive(Debug, Deserialize)]
pub struct FieldError {
    #[serde(default)]
    pub msg: Option<String>,
}

impl ErrorDetail {
    pub fn into_message(self) -> String {
        match self {
            ErrorDetail::Text(text) => text,
            ErrorDetail::Fields(fields) => fields
                .into_iter()
                .map(|f| f.msg.unwrap_or_else(|| "error".to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
