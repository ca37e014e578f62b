pub const HARVEST_CURSORS: &str = "harvest_cursors";
