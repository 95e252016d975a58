pub mod drivers;
pub mod offers;
pub mod rides;
