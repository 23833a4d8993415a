//! Read simulator: marks received messages as read at a human pace.

use crate::recorder::Recorder;
use log::{debug, info};
use std::sync::Arc;
use tgcore::api::{Message, Request};
use tokio::sync::watch;
use tokio::time::sleep;

impl Recorder {
    pub(crate) async fn run_reader(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "Recorder/Reader", "Read simulator started");
        loop {
            let delay = self
                .config
                .human_behaviour
                .next_activity_delay(&mut rand::rng());
            debug!(target: "Recorder/Reader", "Next read session in {delay:?}");
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {},
            }

            if !self.is_authorized() {
                debug!(target: "Recorder/Reader", "Not authorized, skipping read session");
                continue;
            }
            self.read_pending(&mut shutdown).await;
        }

        let read = self.read_pending(&mut shutdown).await;
        info!(target: "Recorder/Reader", "Read simulator stopped, {read} messages in final drain");
    }

    /// One read session over every conversation with pending messages. Once
    /// shutdown is signalled the remaining messages are marked without pauses.
    async fn read_pending(&self, shutdown: &mut watch::Receiver<bool>) -> usize {
        let behaviour = &self.config.human_behaviour;
        let mut read = 0;
        for (chat_id, messages) in self.to_read.drain() {
            self.send_logged(Request::OpenChat { chat_id });
            for message in messages {
                if !*shutdown.borrow() {
                    let pause = behaviour.read_time(&message.content);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {},
                        _ = sleep(pause) => {},
                    }
                }
                self.mark_read(&message);
                read += 1;
            }
            self.send_logged(Request::CloseChat { chat_id });
        }
        read
    }

    fn mark_read(&self, message: &Message) {
        debug!(target: "Recorder/Reader", "Reading {}:{}", message.chat_id, message.id);
        self.send_logged(Request::ViewMessages {
            chat_id: message.chat_id,
            message_thread_id: message.message_thread_id,
            message_ids: vec![message.id],
            force_read: true,
        });
    }
}
