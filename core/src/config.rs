//! Engine configuration — tier table, achievement catalog, marketplace
//! catalogs, escrow timing. Loadable from a JSON file; the built-in
//! defaults cover tests and the demo driver.

use crate::{
    achievement::{Achievement, AchievementTrigger},
    marketplace::{Opportunity, Perk},
    tier::TierDefinition,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tiers: Vec<TierDefinition>,
    pub achievements: Vec<Achievement>,
    #[serde(default)]
    pub perks: Vec<Perk>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    /// Default TTL for purchase escrow sessions.
    pub escrow_ttl_secs: i64,
    /// Background sweep cadence.
    pub sweep_interval_secs: u64,
}

impl EngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {path}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse engine config: {path}"))?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            tiers: default_tiers(),
            achievements: default_achievements(),
            perks: Vec::new(),
            opportunities: Vec::new(),
            escrow_ttl_secs: 900,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

fn default_tiers() -> Vec<TierDefinition> {
    vec![
        TierDefinition {
            level: 0,
            name: "Newbie".to_string(),
            min_balance: 0.0,
            max_balance: Some(100.0),
            community_create_limit: Some(0),
            earning_multiplier: 1.0,
        },
        TierDefinition {
            level: 1,
            name: "Friend".to_string(),
            min_balance: 100.0,
            max_balance: Some(500.0),
            community_create_limit: Some(1),
            earning_multiplier: 1.05,
        },
        TierDefinition {
            level: 2,
            name: "Supporter".to_string(),
            min_balance: 500.0,
            max_balance: Some(2000.0),
            community_create_limit: Some(3),
            earning_multiplier: 1.10,
        },
        TierDefinition {
            level: 3,
            name: "Advocate".to_string(),
            min_balance: 2000.0,
            max_balance: Some(10000.0),
            community_create_limit: Some(10),
            earning_multiplier: 1.25,
        },
        TierDefinition {
            level: 4,
            name: "Legend".to_string(),
            min_balance: 10000.0,
            max_balance: None,
            community_create_limit: None,
            earning_multiplier: 1.50,
        },
    ]
}

fn default_achievements() -> Vec<Achievement> {
    vec![
        Achievement {
            id: "first_earn".to_string(),
            label: "First credits earned".to_string(),
            reward: 5.0,
            trigger: AchievementTrigger::FirstEarn,
        },
        Achievement {
            id: "first_gb".to_string(),
            label: "First gigabyte shared".to_string(),
            reward: 5.0,
            trigger: AchievementTrigger::BandwidthShared { gigabytes: 1.0 },
        },
        Achievement {
            id: "century".to_string(),
            label: "Balance reached 100".to_string(),
            reward: 10.0,
            trigger: AchievementTrigger::BalanceReached { amount: 100.0 },
        },
        Achievement {
            id: "terabyte_club".to_string(),
            label: "A full terabyte shared".to_string(),
            reward: 100.0,
            trigger: AchievementTrigger::BandwidthShared { gigabytes: 1024.0 },
        },
        Achievement {
            id: "founder".to_string(),
            label: "Founded a community".to_string(),
            reward: 25.0,
            trigger: AchievementTrigger::CommunityCreated,
        },
        Achievement {
            id: "summit".to_string(),
            label: "Reached the top tier".to_string(),
            reward: 250.0,
            trigger: AchievementTrigger::TopTierReached,
        },
    ]
}
