pub mod dispatcher;

pub use dispatcher::{ChangeFeed, FeedEvent, Subscription, SubscriptionHandle};
