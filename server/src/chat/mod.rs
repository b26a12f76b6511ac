pub mod fanout;
pub mod lifecycle;
pub mod presence;
pub mod receipts;
pub mod typing;
