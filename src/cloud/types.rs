//! Vendor API payload types

use serde::{Deserialize, Serialize};

/// Name shown when the API returns a device without a friendly name.
pub const DEFAULT_FRIENDLY_NAME: &str = "Philips Air Purifier";

/// A device registered to the account.
///
/// `thing_name` is the AWS IoT thing that both control topics are keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// AWS IoT thing name
    pub thing_name: String,

    /// User-assigned display name
    #[serde(default = "default_friendly_name")]
    pub friendly_name: String,

    /// Vendor device id
    #[serde(default)]
    pub device_id: String,
}

fn default_friendly_name() -> String {
    DEFAULT_FRIENDLY_NAME.to_string()
}

/// Body of `POST /user/self/get-id`. The identity token travels in the body,
/// not in an `Authorization` header.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountIdRequest<'a> {
    pub id_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountIdResponse {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignatureResponse {
    pub signature: String,
}

/// The device endpoint answers with a bare array; a wrapped form is accepted
/// as well.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DeviceListResponse {
    Bare(Vec<DeviceIdentity>),
    Wrapped { devices: Vec<DeviceIdentity> },
}

impl DeviceListResponse {
    pub(crate) fn into_devices(self) -> Vec<DeviceIdentity> {
        match self {
            DeviceListResponse::Bare(devices) => devices,
            DeviceListResponse::Wrapped { devices } => devices,
        }
    }
}
