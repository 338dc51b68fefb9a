use garde::Validate;
use serde::{Deserialize, Serialize};

/// Job type tag for spreadsheet sync jobs.
pub const SHEETS_SYNC_JOB: &str = "sheets_sync";

/// Priority used when a guild asks for a sheet refresh.
pub const SHEETS_SYNC_PRIORITY: i32 = 100;

/// Payload carried by a `sheets_sync` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SheetsSyncPayload {
    #[garde(length(min = 1, max = 100))]
    pub guild_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 100))]
    pub requested_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 200))]
    pub range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 200))]
    pub sheet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub force: Option<bool>,
}

/// Body of `POST /api/v1/guilds/{id}/refresh-sheets`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RefreshSheetsRequest {
    #[serde(default)]
    #[garde(length(min = 1, max = 100))]
    pub requested_by: Option<String>,

    #[serde(default)]
    #[garde(length(min = 1, max = 200))]
    pub range: Option<String>,

    #[serde(default)]
    #[garde(length(min = 1, max = 200))]
    pub sheet_id: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub force: Option<bool>,
}

impl RefreshSheetsRequest {
    pub fn into_payload(self, guild_id: String) -> SheetsSyncPayload {
        SheetsSyncPayload {
            guild_id,
            requested_by: self.requested_by,
            range: self.range,
            sheet_id: self.sheet_id,
            force: self.force,
        }
    }
}
