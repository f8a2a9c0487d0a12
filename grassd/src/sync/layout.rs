//! Where things live in the remote store for one user.

use super::codec;

pub fn owned_tree_key(user_id: &str) -> String {
    format!("users/{user_id}/owned_files")
}

/// Key of the file record for `path` inside the owner's tree.
pub fn record_key(user_id: &str, path: &str) -> String {
    let encoded = codec::encode_path(path);
    if encoded.is_empty() {
        owned_tree_key(user_id)
    } else {
        format!("{}/{encoded}", owned_tree_key(user_id))
    }
}

pub fn access_list_key(user_id: &str) -> String {
    format!("users/{user_id}/access_list")
}

pub fn lock_table_key(scope: &str) -> String {
    format!("locks/{scope}")
}

/// Blob names are not dictionary keys, so the path is stored unencoded.
pub fn object_key(user_id: &str, path: &str) -> String {
    let normalized: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("files/{user_id}/{}", normalized.join("/"))
}
