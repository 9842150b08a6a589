//! Equalizer persistence (JSON under the `equalizer` key)

use crate::db::settings::{get_setting, set_setting};
use crate::equalizer::EqualizerSettings;
use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::warn;

pub const EQUALIZER_KEY: &str = "equalizer";

pub async fn save_equalizer(db: &Pool<Sqlite>, settings: &EqualizerSettings) -> Result<()> {
    let json = serde_json::to_string(settings)?;
    set_setting(db, EQUALIZER_KEY, json).await
}

/// Load saved equalizer settings; unreadable JSON is logged and ignored
pub async fn load_equalizer(db: &Pool<Sqlite>) -> Result<Option<EqualizerSettings>> {
    let Some(json) = get_setting::<String>(db, EQUALIZER_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<EqualizerSettings>(&json) {
        Ok(settings) => Ok(Some(settings.sanitized())),
        Err(e) => {
            warn!("Discarding unreadable equalizer settings: {}", e);
            Ok(None)
        }
    }
}
