mod claims;
mod comments;
mod cursors;
mod notifications;
mod stats;
