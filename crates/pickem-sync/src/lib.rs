// Library root for the sync service: upstream feed client, retry policy,
// schedule sync, and the live score poller.

pub mod feed;
pub mod poller;
pub mod retry;
pub mod schedule;
