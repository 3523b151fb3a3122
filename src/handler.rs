/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::message::Message;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, Span};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receives the messages of every partition.
///
/// Each partition worker awaits the handler before fetching its next message, so a slow
/// handler only holds back the partition it was called for. The span is the partition
/// span of the calling worker. A panic ends the consumption of that partition.
///
/// Plain closures `Fn(&Span, Message)` implement this trait. They run on the blocking
/// thread pool, a closure that blocks does not hold up the runtime threads.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(self: Arc<Self>, span: Span, message: Message) -> HandlerFuture;
}

impl<F> MessageHandler for F
where
    F: Fn(&Span, Message) + Send + Sync + 'static,
{
    fn handle(self: Arc<Self>, span: Span, message: Message) -> HandlerFuture {
        Box::pin(async move {
            let handled =
                tokio::task::spawn_blocking(move || span.in_scope(|| self(&span, message))).await;
            if let Err(error) = handled {
                if error.is_panic() {
                    std::panic::resume_unwind(error.into_panic());
                }
            }
        })
    }
}

/// A handler that only logs what it receives.
#[derive(Debug, Default)]
pub struct LogMessageHandler;

impl MessageHandler for LogMessageHandler {
    fn handle(self: Arc<Self>, span: Span, message: Message) -> HandlerFuture {
        Box::pin(async move {
            span.in_scope(|| {
                info!(
                    offset = message.offset,
                    size = message.value.len(),
                    "Received message from topic: {}",
                    message.topic
                );
            });
        })
    }
}
