pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_redemption;
pub mod order;
pub mod order_item;
pub mod product;
pub mod user;
