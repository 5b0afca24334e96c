use serde::Deserialize;

/// Response body of a POST to a collection path: the store-assigned key of
/// the new child node.
#[derive(Deserialize, Debug)]
pub struct PushResponse {
    pub name: String,
}
