use std::env;

use inotify_channel::{
    Channel,
    EventMask,
    WatchMask,
};
use tracing_subscriber::EnvFilter;


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut channel = Channel::open()
        .expect("Failed to open inotify channel");

    let current_dir = env::current_dir()
        .expect("Failed to determine current directory");

    channel
        .watches()
        .add(
            current_dir,
            WatchMask::MODIFY | WatchMask::CREATE | WatchMask::DELETE
                | WatchMask::MOVE,
        )
        .expect("Failed to add inotify watch");

    println!("Watching current directory for activity...");

    loop {
        let events = channel
            .read_events()
            .expect("Failed to read inotify events");

        for event in events {
            let kind = if event.mask.contains(EventMask::ISDIR) {
                "Directory"
            } else {
                "File"
            };

            if event.mask.contains(EventMask::CREATE) {
                println!("{} created: {:?}", kind, event.name);
            } else if event.mask.contains(EventMask::DELETE) {
                println!("{} deleted: {:?}", kind, event.name);
            } else if event.mask.contains(EventMask::MODIFY) {
                println!("{} modified: {:?}", kind, event.name);
            } else if event.mask.contains(EventMask::MOVED_FROM) {
                println!("{} moved away ({}): {:?}", kind, event.cookie, event.name);
            } else if event.mask.contains(EventMask::MOVED_TO) {
                println!("{} moved here ({}): {:?}", kind, event.cookie, event.name);
            } else if event.mask.contains(EventMask::Q_OVERFLOW) {
                println!("Event queue overflowed, events were lost");
            }
        }
    }
}
