pub mod course;
pub mod order;

pub use course::{Course, CourseClient, HttpCourseClient};
pub use order::{HttpOrderClient, Order, OrderAmount, OrderClient, OrderItem};
