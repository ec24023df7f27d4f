pub mod confirmation;
pub mod coupons;
pub mod order_status;
pub mod orders;
pub mod pricing;
