use coap_engine::{dial, handler_fn, Client, Code, Config, Listener, Message, MessageType};

#[tokio::main]
async fn main() {
    let config = Config::default();
    let listener = Listener::bind("tcp", "127.0.0.1:5683", &config).await.unwrap();

    let _server_task = tokio::spawn(listener.accept_and_serve(handler_fn(|_, request: Message| {
        if !request.is_confirmable() {
            return None;
        }
        let reply = Message::new(MessageType::Acknowledgement, Code::Content, request.message_id)
            .with_token(request.token.clone())
            .with_payload(request.path_string());
        Some(reply)
    })));

    let mut client = dial("tcp", "127.0.0.1:5683", &config).await.unwrap();

    let mut request = Message::new(MessageType::Confirmable, Code::Get, client.next_message_id())
        .with_token(Client::<tokio::net::TcpStream>::random_token());
    request.set_path_string("/Rust");
    println!("Client request: {}", request.path_string());

    let reply = client.send(&request).await.unwrap().unwrap();
    println!("Server reply: {}", String::from_utf8(reply.payload).unwrap());

    client.close().await.unwrap();
}
