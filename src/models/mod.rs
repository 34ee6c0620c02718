pub mod courtesy;
pub mod discount;
pub mod event;
pub mod order;
pub mod ticket;
pub mod ticket_type;

pub use courtesy::{CourtesyBatch, CourtesyStatus, CourtesyTicket};
pub use discount::{DiscountCode, DiscountType, DiscountUsage};
pub use event::Event;
pub use order::{Attendee, Order, OrderItem, OrderProvider, OrderStatus};
pub use ticket::{EntitlementStatus, Scan, ScanResult, Ticket, TicketDayEntitlement, TicketStatus};
pub use ticket_type::{DaySchedule, TicketType};
