use icap_codec::{DecodeEvent, Decoder, DecoderConfig, Error, EventReader, Method};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn reads_events_from_an_async_transport() {
    let (mut client, server) = tokio::io::duplex(256);
    let decoder = Decoder::request(DecoderConfig::default()).unwrap();
    let mut reader = EventReader::new(server, decoder);

    let writer = tokio::spawn(async move {
        client
            .write_all(
                b"OPTIONS icap://s/echo ICAP/1.0\r\nHost: s\r\nEncapsulated: null-body=0\r\n\r\n",
            )
            .await
            .unwrap();
        // dropping the client closes the stream cleanly
    });

    let event = reader.next_event().await.unwrap().expect("head event");
    let DecodeEvent::Head(message) = event else {
        panic!("expected head, got {event:?}");
    };
    assert_eq!(message.method(), Some(&Method::Options));

    assert!(matches!(
        reader.next_event().await.unwrap(),
        Some(DecodeEvent::EndOfMessage)
    ));
    assert!(reader.next_event().await.unwrap().is_none());
    writer.await.unwrap();
}

#[tokio::test]
async fn body_chunks_stream_across_small_writes() {
    let (mut client, server) = tokio::io::duplex(16);
    let decoder = Decoder::request(DecoderConfig::default()).unwrap();
    let mut reader = EventReader::new(server, decoder);

    let writer = tokio::spawn(async move {
        let wire = b"REQMOD icap://s/p ICAP/1.0\r\nHost: s\r\n\
            Encapsulated: req-body=0\r\n\r\n5\r\nHELLO\r\n0\r\n\r\n";
        for piece in wire.chunks(7) {
            client.write_all(piece).await.unwrap();
        }
    });

    assert!(matches!(
        reader.next_event().await.unwrap(),
        Some(DecodeEvent::Head(_))
    ));
    match reader.next_event().await.unwrap() {
        Some(DecodeEvent::Chunk(data)) => assert_eq!(data, b"HELLO"),
        other => panic!("expected chunk, got {other:?}"),
    }
    assert!(matches!(
        reader.next_event().await.unwrap(),
        Some(DecodeEvent::EndOfMessage)
    ));
    writer.await.unwrap();
}

#[tokio::test]
async fn eof_mid_message_is_an_early_close() {
    let (mut client, server) = tokio::io::duplex(256);
    let decoder = Decoder::request(DecoderConfig::default()).unwrap();
    let mut reader = EventReader::new(server, decoder);

    let writer = tokio::spawn(async move {
        client
            .write_all(b"OPTIONS icap://s/echo ICAP/1.0\r\nHost: s\r\n")
            .await
            .unwrap();
    });

    assert_eq!(reader.next_event().await.unwrap_err(), Error::EarlyClose);
    writer.await.unwrap();
}
