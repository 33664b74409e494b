pub mod outbox_poller;
