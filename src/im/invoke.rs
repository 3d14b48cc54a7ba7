/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! One-shot reply bookkeeping for command invocations.
//!
//! Every invoked command must yield exactly one terminal response. The
//! responder enforces this, including when the handler forgets to
//! reply, and absorbs exactly one out-of-space condition from the
//! outgoing message by flushing and resubmitting once.

use crate::dm::paths::ConcreteCmdPath;
use crate::error::{Error, ErrorCode};
use crate::im::IMStatusCode;
use crate::utils::writebuf::WriteBuf;

/// The outgoing message surface replies are committed to.
///
/// `send_data`/`send_status` queue a reply into the current outgoing
/// message and fail with `ErrorCode::NoSpace` when it does not fit;
/// `flush` drains the already queued replies to free space.
pub trait ReplySink {
    fn send_data(&self, path: &ConcreteCmdPath, payload: &[u8]) -> Result<(), Error>;

    fn send_status(&self, path: &ConcreteCmdPath, status: IMStatusCode) -> Result<(), Error>;

    fn flush(&self) -> Result<(), Error>;
}

/// The reply contract object for a single command invocation.
///
/// `reply_encoder` may be taken once to produce a data payload;
/// `complete` finalizes, committing the payload on success or
/// discarding it and sending an error status otherwise.
pub struct InvokeResponder<'a, 'b> {
    path: ConcreteCmdPath,
    sink: &'a dyn ReplySink,
    writer: &'a mut WriteBuf<'b>,
    anchor: usize,
    encoded: bool,
    completed: bool,
}

impl<'a, 'b> InvokeResponder<'a, 'b> {
    pub fn new(
        path: ConcreteCmdPath,
        sink: &'a dyn ReplySink,
        writer: &'a mut WriteBuf<'b>,
    ) -> Self {
        let anchor = writer.get_tail();

        Self {
            path,
            sink,
            writer,
            anchor,
            encoded: false,
            completed: false,
        }
    }

    pub const fn path(&self) -> &ConcreteCmdPath {
        &self.path
    }

    /// The encoder for the reply data, handed out once per reply
    /// attempt.
    pub fn reply_encoder(&mut self) -> Result<&mut WriteBuf<'b>, Error> {
        if self.completed || self.encoded {
            Err(ErrorCode::InvalidState)?;
        }

        self.encoded = true;

        Ok(self.writer)
    }

    /// Finalize the invocation with `status`.
    ///
    /// `Success` commits the encoded data, or a bare success status if
    /// nothing was encoded; any other status discards the encoded data
    /// and sends an error status. Exactly one completion is allowed.
    pub fn complete(mut self, status: IMStatusCode) -> Result<(), Error> {
        self.do_complete(status)
    }

    fn do_complete(&mut self, status: IMStatusCode) -> Result<(), Error> {
        if self.completed {
            Err(ErrorCode::InvalidState)?;
        }

        self.completed = true;

        let result = if status == IMStatusCode::Success {
            if self.encoded {
                let writer = &*self.writer;
                let anchor = self.anchor;
                let path = self.path;

                Self::submit(self.sink, move |sink| {
                    sink.send_data(&path, writer.since(anchor))
                })
            } else {
                let path = self.path;
                Self::submit(self.sink, move |sink| sink.send_status(&path, status))
            }
        } else {
            // Error status: any encoded data is dead weight
            self.writer.rewind_tail_to(self.anchor);
            self.encoded = false;

            let path = self.path;
            Self::submit(self.sink, move |sink| sink.send_status(&path, status))
        };

        // The reply region is spent either way
        self.writer.rewind_tail_to(self.anchor);

        result
    }

    /// Hand the sink the reply, retrying exactly once if the outgoing
    /// message is out of space: flush the queued replies and resubmit.
    /// A second out-of-space is reported as-is.
    fn submit<F>(sink: &dyn ReplySink, send: F) -> Result<(), Error>
    where
        F: Fn(&dyn ReplySink) -> Result<(), Error>,
    {
        match send(sink) {
            Err(err) if err.code() == ErrorCode::NoSpace => {
                debug!("Reply did not fit, flushing pending replies and retrying");

                sink.flush()?;
                send(sink)
            }
            other => other,
        }
    }
}

/// An [`InvokeResponder`] with a safety net: if the holder never
/// completes, dropping it sends exactly one generic failure status.
pub struct AutoCompleteInvokeResponder<'a, 'b> {
    responder: Option<InvokeResponder<'a, 'b>>,
}

impl<'a, 'b> AutoCompleteInvokeResponder<'a, 'b> {
    pub fn new(
        path: ConcreteCmdPath,
        sink: &'a dyn ReplySink,
        writer: &'a mut WriteBuf<'b>,
    ) -> Self {
        Self {
            responder: Some(InvokeResponder::new(path, sink, writer)),
        }
    }

    pub fn reply_encoder(&mut self) -> Result<&mut WriteBuf<'b>, Error> {
        self.responder_mut()?.reply_encoder()
    }

    pub fn complete(mut self, status: IMStatusCode) -> Result<(), Error> {
        let responder = self.responder.take().ok_or(ErrorCode::InvalidState)?;

        responder.complete(status)
    }

    /// Defer the reply: the returned handle carries the same
    /// exactly-one-completion guarantee through its own drop.
    pub fn reply_async(mut self) -> Result<AsyncReply<'a, 'b>, Error> {
        let responder = self.responder.take().ok_or(ErrorCode::InvalidState)?;

        Ok(AsyncReply { responder: Some(responder) })
    }

    fn responder_mut(&mut self) -> Result<&mut InvokeResponder<'a, 'b>, Error> {
        self.responder
            .as_mut()
            .ok_or_else(|| ErrorCode::InvalidState.into())
    }
}

impl Drop for AutoCompleteInvokeResponder<'_, '_> {
    fn drop(&mut self) {
        if let Some(mut responder) = self.responder.take() {
            warn!("Command invocation dropped without a reply, sending a failure status");

            if let Err(err) = responder.do_complete(IMStatusCode::Failure) {
                error!("Failed to send the forced failure status: {:?}", err);
            }
        }
    }
}

/// A deferred reply handle. Dropping it without an explicit `complete`
/// still produces exactly one failure completion.
pub struct AsyncReply<'a, 'b> {
    responder: Option<InvokeResponder<'a, 'b>>,
}

impl<'a, 'b> AsyncReply<'a, 'b> {
    pub fn reply_encoder(&mut self) -> Result<&mut WriteBuf<'b>, Error> {
        self.responder
            .as_mut()
            .ok_or(ErrorCode::InvalidState)?
            .reply_encoder()
    }

    pub fn complete(mut self, status: IMStatusCode) -> Result<(), Error> {
        let responder = self.responder.take().ok_or(ErrorCode::InvalidState)?;

        responder.complete(status)
    }
}

impl Drop for AsyncReply<'_, '_> {
    fn drop(&mut self) {
        if let Some(mut responder) = self.responder.take() {
            warn!("Deferred reply dropped without a reply, sending a failure status");

            if let Err(err) = responder.do_complete(IMStatusCode::Failure) {
                error!("Failed to send the forced failure status: {:?}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::error::{Error, ErrorCode};

    const PATH: ConcreteCmdPath = ConcreteCmdPath::new(1, 0x0006, 0x02);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Data(Vec<u8>),
        Status(IMStatusCode),
    }

    struct FakeSink {
        // Fail this many sends with NoSpace before accepting
        reject: Cell<usize>,
        flushes: Cell<usize>,
        sent: RefCell<Vec<Sent>>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                reject: Cell::new(0),
                flushes: Cell::new(0),
                sent: RefCell::new(Vec::new()),
            }
        }

        fn check_space(&self) -> Result<(), Error> {
            if self.reject.get() > 0 {
                self.reject.set(self.reject.get() - 1);
                Err(ErrorCode::NoSpace)?;
            }

            Ok(())
        }
    }

    impl ReplySink for FakeSink {
        fn send_data(&self, _path: &ConcreteCmdPath, payload: &[u8]) -> Result<(), Error> {
            self.check_space()?;
            self.sent.borrow_mut().push(Sent::Data(payload.to_vec()));
            Ok(())
        }

        fn send_status(&self, _path: &ConcreteCmdPath, status: IMStatusCode) -> Result<(), Error> {
            self.check_space()?;
            self.sent.borrow_mut().push(Sent::Status(status));
            Ok(())
        }

        fn flush(&self) -> Result<(), Error> {
            self.flushes.set(self.flushes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_data_reply() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let mut responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.reply_encoder().unwrap().le_u16(0x1234).unwrap();
        responder.complete(IMStatusCode::Success).unwrap();

        assert_eq!(&*sink.sent.borrow(), &[Sent::Data(vec![0x34, 0x12])]);
        // The reply region is released after completion
        assert_eq!(writer.get_tail(), 0);
    }

    #[test]
    fn test_bare_success() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.complete(IMStatusCode::Success).unwrap();

        assert_eq!(
            &*sink.sent.borrow(),
            &[Sent::Status(IMStatusCode::Success)]
        );
    }

    #[test]
    fn test_error_discards_data() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let mut responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.reply_encoder().unwrap().le_u32(0xffffffff).unwrap();
        responder.complete(IMStatusCode::InvalidCommand).unwrap();

        assert_eq!(
            &*sink.sent.borrow(),
            &[Sent::Status(IMStatusCode::InvalidCommand)]
        );
        assert_eq!(writer.get_tail(), 0);
    }

    #[test]
    fn test_drop_forces_single_failure() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        {
            let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
            drop(responder);
        }

        assert_eq!(
            &*sink.sent.borrow(),
            &[Sent::Status(IMStatusCode::Failure)]
        );
    }

    #[test]
    fn test_explicit_complete_suppresses_drop_reply() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.complete(IMStatusCode::Success).unwrap();

        assert_eq!(sink.sent.borrow().len(), 1);
    }

    #[test]
    fn test_single_nospace_retry() {
        let sink = FakeSink::new();
        sink.reject.set(1);

        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let mut responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.reply_encoder().unwrap().le_u8(0x7).unwrap();
        responder.complete(IMStatusCode::Success).unwrap();

        assert_eq!(sink.flushes.get(), 1);
        assert_eq!(&*sink.sent.borrow(), &[Sent::Data(vec![0x7])]);
    }

    #[test]
    fn test_second_nospace_is_terminal() {
        let sink = FakeSink::new();
        sink.reject.set(2);

        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        assert_eq!(
            responder
                .complete(IMStatusCode::Success)
                .map_err(|err| err.code()),
            Err(ErrorCode::NoSpace)
        );

        assert_eq!(sink.flushes.get(), 1);
        assert!(sink.sent.borrow().is_empty());
    }

    #[test]
    fn test_encoder_handed_out_once() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let mut responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        responder.reply_encoder().unwrap();
        assert_eq!(
            responder.reply_encoder().map(|_| ()).map_err(|err| err.code()),
            Err(ErrorCode::InvalidState)
        );

        responder.complete(IMStatusCode::Success).unwrap();
    }

    #[test]
    fn test_async_reply_drop_guarantee() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        {
            let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
            let reply = responder.reply_async().unwrap();
            drop(reply);
        }

        assert_eq!(
            &*sink.sent.borrow(),
            &[Sent::Status(IMStatusCode::Failure)]
        );
    }

    #[test]
    fn test_async_reply_explicit() {
        let sink = FakeSink::new();
        let mut raw = [0; 32];
        let mut writer = WriteBuf::new(&mut raw);

        let responder = AutoCompleteInvokeResponder::new(PATH, &sink, &mut writer);
        let mut reply = responder.reply_async().unwrap();
        reply.reply_encoder().unwrap().le_u8(0x1).unwrap();
        reply.complete(IMStatusCode::Success).unwrap();

        assert_eq!(&*sink.sent.borrow(), &[Sent::Data(vec![0x1])]);
    }
}
