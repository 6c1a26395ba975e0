pub mod audit;
pub mod auth_codes;
pub mod clients;
pub mod consents;
pub mod flows;
pub mod idps;
pub mod jwk_keys;
pub mod metadata;
pub mod refresh_tokens;
pub mod sessions;
pub mod tenants;
pub mod users;
