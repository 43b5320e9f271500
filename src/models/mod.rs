pub mod day;
pub mod sale;
pub mod scan;

pub use day::DayWindow;
pub use sale::{
    normalize_product_code, quantity_key, to_cents, ReconciledSale, SaleRecord, SellKey, SellRow,
    SellStatus,
};
pub use scan::{NewScan, ScanEvent, ScanRow, ScanStatus, ScanTransition, UnknownScanStatus};
