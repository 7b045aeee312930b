pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{accent, dim, error, header, info, muted, section, success, summary_row, undo, warn};
pub use table::{render_rows, stats_table, TableBuilder};
pub use theme::{Palette, Role};
