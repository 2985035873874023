use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use card_capture::{
    Channel, ChannelConfig, ChannelError, ChannelFactory, ChannelListener, codec,
    messages::{Command, Message, MessageType, MethodType, Reply},
    telemetry,
};
use serde_json::Value;

/// What the simulated card service has observed.
#[derive(Debug, Default)]
pub struct ServiceLog {
    pub channels: usize,
    pub disconnects: usize,
    pub commands: Vec<MethodType>,
}

/// Factory of channels to a simulated card service.
///
/// Every channel connects successfully and, once the card data request
/// arrives, plays back `script`: each frame is delivered after its delay.
#[derive(Clone)]
pub struct SimulatedService {
    pub log: Arc<Mutex<ServiceLog>>,
    script: Vec<(Duration, String)>,
}

impl SimulatedService {
    pub fn new(script: Vec<(Duration, String)>) -> Self {
        telemetry::init_tracing();
        Self {
            log: Arc::default(),
            script,
        }
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().unwrap().disconnects
    }

    #[allow(dead_code)]
    pub fn commands(&self) -> Vec<MethodType> {
        self.log.lock().unwrap().commands.clone()
    }
}

impl ChannelFactory for SimulatedService {
    fn create(
        &self,
        name: &str,
        _config: &ChannelConfig,
        listener: ChannelListener,
    ) -> Result<Box<dyn Channel>, ChannelError> {
        if name != "smartcards" {
            return Err(ChannelError::Unavailable(format!("no such channel: {name}")));
        }
        self.log.lock().unwrap().channels += 1;
        Ok(Box::new(SimulatedChannel {
            service: self.clone(),
            listener,
        }))
    }
}

struct SimulatedChannel {
    service: SimulatedService,
    listener: ChannelListener,
}

#[async_trait]
impl Channel for SimulatedChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.listener.connection_succeeded();
        Ok(())
    }

    async fn send_text(&mut self, payload: String) -> Result<(), ChannelError> {
        let command: Command =
            codec::from_base64_url(&payload).map_err(|e| ChannelError::Send(e.to_string()))?;
        self.service.log.lock().unwrap().commands.push(command.method);

        if command.method == MethodType::GetCardDataEx {
            let listener = self.listener.clone();
            let script = self.service.script.clone();
            tokio::spawn(async move {
                for (delay, frame) in script {
                    tokio::time::sleep(delay).await;
                    listener.data_received_text(frame);
                }
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.service.log.lock().unwrap().disconnects += 1;
    }
}

fn frame(kind: MessageType, payload: &impl serde::Serialize) -> String {
    Message::new(kind, codec::to_base64_url(payload).unwrap())
        .encode()
        .unwrap()
}

pub fn reply(result: i64, data: Option<&Value>) -> String {
    let reply = Reply {
        method: Some(MethodType::GetCardDataEx.into()),
        result: Some(result),
        data: data.map(|d| codec::to_base64_url(d).unwrap()),
    };
    frame(MessageType::Reply, &reply)
}

pub fn async_notification(payload: &Value) -> String {
    frame(MessageType::AsyncNotification, payload)
}

#[allow(dead_code)]
pub fn device_notification(payload: &Value) -> String {
    frame(MessageType::Notification, payload)
}
