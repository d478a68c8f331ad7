/// Commands from the front-end down to the realtime client.
#[derive(Debug, Clone)]
pub enum ChatCommand {
    SendMessage(String),
}
