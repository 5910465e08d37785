use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::models::UserProfile;
use crate::store::{get_as, paths, DocumentStore};

pub async fn get_profile(store: &dyn DocumentStore, user_id: &str) -> AppResult<Option<UserProfile>> {
    Ok(get_as(store, &paths::user_profile(user_id)?).await?)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Merges `update` into the stored profile, creating it on first save.
pub async fn upsert_profile(
    store: &dyn DocumentStore,
    user_id: &str,
    email: Option<&str>,
    update: ProfileUpdate,
) -> AppResult<UserProfile> {
    let path = paths::user_profile(user_id)?;
    let now = Value::String(Utc::now().to_rfc3339());
    let existing = store.get(&path).await?;

    let mut fields = Map::new();
    if let Some(first_name) = update.first_name {
        fields.insert("firstName".into(), Value::String(first_name.trim().to_string()));
    }
    if let Some(last_name) = update.last_name {
        fields.insert("lastName".into(), Value::String(last_name.trim().to_string()));
    }
    if let Some(email) = email {
        fields.insert("email".into(), Value::String(email.to_string()));
    }
    fields.insert("updatedAt".into(), now.clone());

    match existing {
        Some(_) => store.update(&path, fields).await?,
        None => {
            fields.insert("createdAt".into(), now);
            store.set(&path, Value::Object(fields)).await?
        }
    }

    Ok(get_as(store, &path).await?.unwrap_or_else(|| UserProfile {
        id: user_id.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        email: email.unwrap_or_default().to_string(),
        created_at: None,
        updated_at: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn updates_merge_into_existing_profile() {
        let store = MemoryStore::new();
        upsert_profile(
            &store,
            "u1",
            Some("sam@example.com"),
            ProfileUpdate {
                first_name: Some(" Sam ".into()),
                last_name: Some("Ortiz".into()),
            },
        )
        .await
        .unwrap();

        let profile = upsert_profile(
            &store,
            "u1",
            None,
            ProfileUpdate {
                first_name: Some("Samuel".into()),
                last_name: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(profile.id, "u1");
        assert_eq!(profile.first_name, "Samuel");
        assert_eq!(profile.last_name, "Ortiz");
        assert_eq!(profile.email, "sam@example.com");
        assert!(profile.created_at.is_some());
    }

    #[tokio::test]
    async fn missing_profile_is_none() {
        let store = MemoryStore::new();
        assert!(get_profile(&store, "nobody").await.unwrap().is_none());
    }
}
