use std::time::Duration;

pub const MASTERY_TTL: Duration = Duration::from_secs(5 * 60);
pub const FORGETTING_CURVE_TTL: Duration = Duration::from_secs(10 * 60);

pub fn user_prefix(user_id: &str) -> String {
    format!("user:{}:", user_id)
}

pub fn mastery_key(user_id: &str, deck_id: Option<&str>) -> String {
    format!("user:{}:mastery:{}", user_id, deck_id.unwrap_or("*"))
}

pub fn forgetting_curve_key(item_id: &str) -> String {
    format!("item:{}:curve", item_id)
}
