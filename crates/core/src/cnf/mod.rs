use std::sync::LazyLock;

/// The name of the counter table holding one row per logical table.
pub static COUNTER_TABLE: LazyLock<String> =
	lazy_env_parse!("KEYFOUNT_COUNTER_TABLE", String, String::from("ID_TABLE"));

/// The primary key column of the counter table.
pub const COUNTER_TABLE_ID: &str = "ID_TABLE_ID";

/// The column holding the unique logical table name.
pub const COLUMN_TABLE_NAME: &str = "TABLE_NAME";

/// The column holding the next unallocated id for a table.
pub const COLUMN_NEXT_ID: &str = "NEXT_ID";

/// The column holding the block size to reserve per refill for a table.
pub const COLUMN_QUANTITY: &str = "QUANTITY";

/// Whether the background housekeeper task is started at construction.
pub static PREFETCH_ENABLED: LazyLock<bool> = lazy_env_parse!("KEYFOUNT_PREFETCH", bool, true);

/// Whether block quantities grow automatically under sustained demand.
pub static ADAPTIVE_QUANTITY_ENABLED: LazyLock<bool> =
	lazy_env_parse!("KEYFOUNT_ADAPTIVE_QUANTITY", bool, true);

/// Specifies the number of seconds the housekeeper sleeps between scans.
pub static HOUSEKEEPER_INTERVAL: LazyLock<u64> =
	lazy_env_parse!("KEYFOUNT_HOUSEKEEPER_INTERVAL", u64, 60);

/// Headroom applied when growing a block quantity, so that a reserved block
/// outlasts one housekeeper interval at the observed consumption rate.
pub const QUANTITY_SAFETY_MARGIN: f64 = 1.2;
