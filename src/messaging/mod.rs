// Messaging - lock-free channels between the GUI and the dispatch thread

pub mod channels;
pub mod command;
pub mod notification;

pub use channels::{
    CommandConsumer, CommandProducer, InputConsumer, InputProducer, NotificationConsumer,
    NotificationProducer, Notifier, TakeConsumer, TakeProducer, create_command_channel,
    create_input_channel, create_notification_channel, create_take_channel,
};
pub use command::TransportCommand;
pub use notification::{
    Notification, NotificationCategory, NotificationLevel, PositionReport, StatusMessage,
};
