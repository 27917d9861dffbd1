use {
    super::{Exchange, Pair},
    serde::{Deserialize, Serialize},
    std::{fs, path::Path},
};

/// On-disk snapshot of the exchange-info pair list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairsSnapshot {
    pub pairs: Vec<Pair>,
    pub timestamp: i64,
}

/// Save pairs to a JSON file
pub fn save_pairs(pairs: &[Pair], file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = PairsSnapshot {
        pairs: pairs.to_vec(),
        timestamp: chrono::Utc::now().timestamp(),
    };

    let json = serde_json::to_string_pretty(&snapshot)?;
    fs::write(file_path, json)?;

    log::debug!("Saved {} pairs to {}", pairs.len(), file_path);
    Ok(())
}

/// Load pairs from a JSON file, `None` when the file does not exist
pub fn load_pairs(file_path: &str) -> Result<Option<Vec<Pair>>, Box<dyn std::error::Error>> {
    if !Path::new(file_path).exists() {
        log::info!("No pairs cache found: {}", file_path);
        return Ok(None);
    }

    let json = fs::read_to_string(file_path)?;
    let snapshot: PairsSnapshot = serde_json::from_str(&json)?;

    log::info!("📂 Loaded {} pairs from {}", snapshot.pairs.len(), file_path);
    Ok(Some(snapshot.pairs))
}

/// Load the cached pair list, or fetch it once and cache it
///
/// An unreadable cache is refetched rather than treated as fatal.
pub async fn load_or_fetch_pairs(
    exchange: &dyn Exchange,
    file_path: &str,
) -> Result<Vec<Pair>, Box<dyn std::error::Error>> {
    match load_pairs(file_path) {
        Ok(Some(pairs)) if !pairs.is_empty() => return Ok(pairs),
        Ok(_) => {}
        Err(e) => log::warn!("⚠️  Pairs cache {} unreadable, refetching: {}", file_path, e),
    }

    let pairs = exchange.get_exchange_info().await?;
    log::info!("🌐 Fetched {} pairs from exchange info", pairs.len());

    if let Err(e) = save_pairs(&pairs, file_path) {
        log::warn!("⚠️  Failed to cache pairs: {}", e);
    }
    Ok(pairs)
}
