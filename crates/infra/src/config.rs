use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub admin_cookie_name: String,
    pub user_cookie_name: String,
    /// Comma-separated user ids seeded into the role table as admins.
    pub admin_user_ids: String,
    pub realtime_channel_capacity: usize,
    pub crm_enabled: bool,
    pub crm_base_url: String,
    pub crm_token: String,
    pub crm_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("admin_cookie_name", "careline_admin")?
            .set_default("user_cookie_name", "careline_user")?
            .set_default("admin_user_ids", "")?
            .set_default("realtime_channel_capacity", 256)?
            .set_default("crm_enabled", false)?
            .set_default("crm_base_url", "http://127.0.0.1:8080/crm")?
            .set_default("crm_token", "dev-crm-token")?
            .set_default("crm_timeout_ms", 2_500)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn seeded_admin_ids(&self) -> Vec<String> {
        self.admin_user_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_admins(admin_user_ids: &str) -> AppConfig {
        AppConfig {
            app_env: "test".to_string(),
            port: 0,
            log_level: "info".to_string(),
            jwt_secret: "test-secret".to_string(),
            admin_cookie_name: "careline_admin".to_string(),
            user_cookie_name: "careline_user".to_string(),
            admin_user_ids: admin_user_ids.to_string(),
            realtime_channel_capacity: 16,
            crm_enabled: false,
            crm_base_url: "http://127.0.0.1:8080/crm".to_string(),
            crm_token: "test".to_string(),
            crm_timeout_ms: 1_000,
        }
    }

    #[test]
    fn seeded_admin_ids_trims_and_skips_empty_entries() {
        let config = config_with_admins(" admin-1, admin-2 ,,");
        assert_eq!(config.seeded_admin_ids(), vec!["admin-1", "admin-2"]);
        assert!(config_with_admins("").seeded_admin_ids().is_empty());
    }
}
