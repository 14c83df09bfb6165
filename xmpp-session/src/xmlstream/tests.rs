// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;

use tokio::io::AsyncWriteExt;

use super::*;

fn data(contents: &str) -> Element {
    Element::builder("data", "urn:example")
        .append(contents.to_owned())
        .build()
}

fn contents(element: &Element) -> String {
    assert!(element.is("data", "urn:example"), "{:?}", element);
    element.text()
}

#[tokio::test]
async fn test_initiate_accept_stream() {
    let (lhs, rhs) = tokio::io::duplex(65536);
    let initiator = tokio::spawn(async move {
        let stream = initiate_stream(
            lhs,
            "jabber:client",
            &StreamHeader {
                from: Some("client".into()),
                to: Some("server".into()),
                id: Some("client-id".into()),
            },
            Timeouts::tight(),
        )
        .await?;
        Ok::<_, io::Error>(stream.header().clone())
    });
    let responder = tokio::spawn(async move {
        let mut stream = accept_stream(rhs, "jabber:client", Timeouts::tight()).await?;
        assert_eq!(stream.header().from.as_deref(), Some("client"));
        assert_eq!(stream.header().to.as_deref(), Some("server"));
        assert_eq!(stream.header().id.as_deref(), Some("client-id"));
        stream
            .send_header(&StreamHeader {
                from: Some("server".into()),
                to: Some("client".into()),
                id: Some("server-id".into()),
            })
            .await
    });
    responder.await.unwrap().expect("responder");
    let server_header = initiator.await.unwrap().expect("initiator");
    assert_eq!(server_header.from.as_deref(), Some("server"));
    assert_eq!(server_header.to.as_deref(), Some("client"));
    assert_eq!(server_header.id.as_deref(), Some("server-id"));
}

#[tokio::test]
async fn test_exchange_features_and_data() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let initiator = tokio::spawn(async move {
        let mut stream = initiate_stream(
            lhs,
            "jabber:client",
            &StreamHeader::default(),
            Timeouts::tight(),
        )
        .await?;
        let features = stream.recv_features().await?;
        assert!(features.can_bind);
        stream.send(&data("hello")).await?;
        let reply = stream.recv().await?;
        assert_eq!(contents(&reply), "world & <friends>");
        Ok::<_, Error>(())
    });

    let responder = tokio::spawn(async move {
        let mut stream = accept_stream(rhs, "jabber:client", Timeouts::tight()).await?;
        stream.send_header(&StreamHeader::default()).await?;
        let features: Element = "<features xmlns='http://etherx.jabber.org/streams'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>"
            .parse()
            .unwrap();
        stream.send(&features).await?;
        let request = stream.recv().await?;
        assert_eq!(contents(&request), "hello");
        stream.send(&data("world & <friends>")).await?;
        Ok::<_, Error>(())
    });

    responder.await.unwrap().expect("responder failed");
    initiator.await.unwrap().expect("initiator failed");
}

#[tokio::test]
async fn test_nested_elements_and_keepalives() {
    let (lhs, mut rhs) = tokio::io::duplex(65536);
    rhs.write_all(b"<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='abc' version='1.0'>  \n <message to='a@b' type='chat'><body>hi <b xmlns='urn:x'>there</b>!</body><x xmlns='urn:y' k='v'/></message> ")
        .await
        .unwrap();
    let mut stream = initiate_stream(
        lhs,
        "jabber:client",
        &StreamHeader::default(),
        Timeouts::tight(),
    )
    .await
    .unwrap();
    assert_eq!(stream.header().id.as_deref(), Some("abc"));
    let message = stream.recv().await.unwrap();
    assert!(message.is("message", "jabber:client"));
    assert_eq!(message.attr("to"), Some("a@b"));
    let body = message.get_child("body", "jabber:client").unwrap();
    assert_eq!(body.text(), "hi !");
    assert_eq!(body.get_child("b", "urn:x").unwrap().text(), "there");
    assert_eq!(
        message.get_child("x", "urn:y").unwrap().attr("k"),
        Some("v")
    );
}

#[tokio::test]
async fn test_soft_timeout_keeps_partial_element() {
    let (lhs, mut rhs) = tokio::io::duplex(65536);
    rhs.write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'><message><bo")
        .await
        .unwrap();
    let stream = initiate_stream(
        lhs,
        "jabber:client",
        &StreamHeader::default(),
        Timeouts::tight(),
    )
    .await
    .unwrap();
    let (mut reader, _writer) = stream.split();
    match reader
        .next_element_timeout(Duration::from_millis(50))
        .await
    {
        Err(ReadError::SoftTimeout) => (),
        other => panic!("unexpected read result: {:?}", other),
    }
    rhs.write_all(b"dy>late</body></message>").await.unwrap();
    let message = reader
        .next_element_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        message.get_child("body", "jabber:client").unwrap().text(),
        "late"
    );
}

#[tokio::test]
async fn test_stream_error_is_reported() {
    let (lhs, mut rhs) = tokio::io::duplex(65536);
    rhs.write_all(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'><stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>")
        .await
        .unwrap();
    let mut stream = initiate_stream(
        lhs,
        "jabber:client",
        &StreamHeader::default(),
        Timeouts::tight(),
    )
    .await
    .unwrap();
    match stream.recv().await {
        Err(Error::Stream(e)) => {
            assert_eq!(e.condition, crate::stream_error::DefinedCondition::Conflict)
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_clean_shutdown() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let initiator = tokio::spawn(async move {
        let mut stream = initiate_stream(
            lhs,
            "jabber:client",
            &StreamHeader::default(),
            Timeouts::tight(),
        )
        .await?;
        stream.close().await?;
        match stream.recv().await {
            Err(Error::Disconnected) => (),
            other => panic!("unexpected stream message: {:?}", other),
        }
        Ok::<_, Error>(())
    });

    let responder = tokio::spawn(async move {
        let mut stream = accept_stream(rhs, "jabber:client", Timeouts::tight()).await?;
        stream.send_header(&StreamHeader::default()).await?;
        match stream.recv().await {
            Err(Error::Disconnected) => (),
            other => panic!("unexpected stream message: {:?}", other),
        }
        stream.close().await?;
        Ok::<_, Error>(())
    });

    responder.await.unwrap().expect("responder failed");
    initiator.await.unwrap().expect("initiator failed");
}

#[tokio::test]
async fn test_exchange_data_stream_reset_and_shutdown() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let initiator = tokio::spawn(async move {
        let mut stream = initiate_stream(
            lhs,
            "jabber:client",
            &StreamHeader::default(),
            Timeouts::tight(),
        )
        .await?;
        stream.send(&data("hello")).await?;
        assert_eq!(contents(&stream.recv().await?), "world!");

        stream
            .restart(&StreamHeader {
                from: Some("client".into()),
                to: Some("server".into()),
                id: Some("client-id".into()),
            })
            .await?;
        assert_eq!(stream.header().from.as_deref(), Some("server"));
        assert_eq!(stream.header().id.as_deref(), Some("server-id"));

        stream.send(&data("once more")).await?;
        assert_eq!(contents(&stream.recv().await?), "and again");
        stream.close().await?;
        match stream.recv().await {
            Err(Error::Disconnected) => (),
            other => panic!("unexpected stream message: {:?}", other),
        }
        Ok::<_, Error>(())
    });

    let responder = tokio::spawn(async move {
        let mut stream = accept_stream(rhs, "jabber:client", Timeouts::tight()).await?;
        stream.send_header(&StreamHeader::default()).await?;
        assert_eq!(contents(&stream.recv().await?), "hello");
        stream.send(&data("world!")).await?;

        stream.accept_restart().await?;
        assert_eq!(stream.header().from.as_deref(), Some("client"));
        stream
            .send_header(&StreamHeader {
                from: Some("server".into()),
                to: Some("client".into()),
                id: Some("server-id".into()),
            })
            .await?;
        assert_eq!(contents(&stream.recv().await?), "once more");
        stream.send(&data("and again")).await?;
        match stream.recv().await {
            Err(Error::Disconnected) => (),
            other => panic!("unexpected stream message: {:?}", other),
        }
        stream.close().await?;
        Ok::<_, Error>(())
    });

    responder.await.unwrap().expect("responder failed");
    initiator.await.unwrap().expect("initiator failed");
}
