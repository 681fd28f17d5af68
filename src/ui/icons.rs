//! Status glyphs shared by the terminal output.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static ARROW: Emoji<'_, '_> = Emoji("➜ ", "->");
pub static SHIELD: Emoji<'_, '_> = Emoji("🛡️  ", "[SIG]");
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[SCAN]");
pub static DISK: Emoji<'_, '_> = Emoji("💾 ", "[SAVE]");
