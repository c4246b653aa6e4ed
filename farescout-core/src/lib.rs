pub mod client;
pub mod criteria;
pub mod filter;
pub mod offer;
pub mod request;

pub use client::{
    ClientError, JobStatus, PollResult, PriceCalendarClient, SearchJobClient, SearchJobId,
};
pub use criteria::{CabinClass, PassengerCounts, Place, SearchCriteria, TravelSegment};
pub use filter::{FilterSpec, SortKey, TimeWindow};
pub use offer::{BookingProvider, DayPrice, FlightLeg, FlightOffer, FlightSegment, MonthKey, Price};
pub use request::{CriteriaError, SearchRequest, SearchRequestBuilder};
