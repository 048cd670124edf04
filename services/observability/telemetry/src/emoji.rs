//! Standard emoji prefixes for coordinator log lines

pub struct LogEmoji;

impl LogEmoji {
    pub const START: &'static str = "🚀";
    pub const SUCCESS: &'static str = "✅";
    pub const ERROR: &'static str = "❌";
    pub const WARNING: &'static str = "⚠️";

    pub const SEARCH: &'static str = "🔍"; // detector hits
    pub const EXECUTE: &'static str = "⚡"; // strike dispatch
    pub const BUNDLE: &'static str = "📦"; // relay bundles
    pub const MONEY: &'static str = "💰"; // profitability
    pub const NETWORK: &'static str = "🌐"; // connections
    pub const GAS: &'static str = "⛽";
    pub const SIGNAL: &'static str = "📡"; // bus fan-out
    pub const PROCESS: &'static str = "🔁"; // spawn/respawn
    pub const LOCK: &'static str = "🔒"; // sequence reservations
}
