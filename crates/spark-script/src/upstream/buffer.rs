//! 上游连接的缓冲区。
//!
//! [`RecvBuffer`] 复用同一块分配：`start` 为空（未激活）表示没有进行中的部分读取，可以安全地重新登记读兴趣；
//! 激活后 `pos <= last <= end` 恒成立。[`SendChain`] 按顺序保存尚未写出的数据，部分写出只前移游标，不丢字节。

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// 接收缓冲区。
#[derive(Debug, Default)]
pub struct RecvBuffer {
    storage: BytesMut,
    active: bool,
    pos: usize,
    last: usize,
}

impl RecvBuffer {
    /// 激活缓冲区；首次使用时按 `size` 分配，之后复用同一块内存。
    pub fn begin(&mut self, size: usize) {
        if self.storage.len() != size {
            self.storage.resize(size, 0);
        }
        self.active = true;
        self.pos = 0;
        self.last = 0;
    }

    /// 是否存在进行中的部分读取。
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 可写入的剩余空间；未激活时为 0。
    pub fn remaining(&self) -> usize {
        if self.active {
            self.storage.len() - self.last
        } else {
            0
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 空闲区域 `[last, end)`。
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let last = self.last;
        &mut self.storage[last..]
    }

    /// 记录新写入的 `n` 个字节；超出空闲区域的部分被截断。
    pub fn commit(&mut self, n: usize) {
        self.last = (self.last + n).min(self.storage.len());
    }

    /// 已读入但尚未取走的数据 `[pos, last)`。
    pub fn filled(&self) -> &[u8] {
        &self.storage[self.pos..self.last]
    }

    /// 取走已读入数据的副本并前移 `pos`。
    pub fn take_filled(&mut self) -> Bytes {
        let chunk = Bytes::copy_from_slice(self.filled());
        self.pos = self.last;
        chunk
    }

    /// 结束部分读取；保留分配以便下次复用。
    pub fn reset(&mut self) {
        self.active = false;
        self.pos = 0;
        self.last = 0;
    }

    /// 释放底层分配。
    pub fn release(&mut self) {
        self.reset();
        self.storage = BytesMut::new();
    }

    pub fn offsets(&self) -> (usize, usize, usize) {
        (self.pos, self.last, self.storage.len())
    }
}

/// 待发送链。
#[derive(Debug, Default)]
pub struct SendChain {
    chunks: VecDeque<Bytes>,
    pending: usize,
}

impl SendChain {
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.pending += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn front(&self) -> Option<&Bytes> {
        self.chunks.front()
    }

    /// 记录已写出 `n` 个字节。
    pub fn advance(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let step = n.min(front.len());
            front.advance(step);
            self.pending -= step;
            n -= step;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reset_keeps_allocation_for_reuse() {
        let mut buf = RecvBuffer::default();
        assert!(!buf.is_active());
        buf.begin(8);
        buf.spare_mut()[..3].copy_from_slice(b"abc");
        buf.commit(3);
        assert_eq!(buf.take_filled(), Bytes::from_static(b"abc"));
        buf.reset();
        assert!(!buf.is_active());
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.remaining(), 0);
        buf.release();
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn send_chain_advances_across_chunks() {
        let mut chain = SendChain::default();
        chain.push(Bytes::from_static(b"hel"));
        chain.push(Bytes::from_static(b"lo"));
        chain.advance(4);
        assert_eq!(chain.pending(), 1);
        assert_eq!(chain.front().map(|b| b.as_ref()), Some(&b"o"[..]));
        chain.advance(1);
        assert!(chain.is_empty());
    }

    proptest! {
        #[test]
        fn offsets_stay_ordered(size in 1usize..64, commits in proptest::collection::vec(0usize..32, 0..16)) {
            let mut buf = RecvBuffer::default();
            buf.begin(size);
            for n in commits {
                buf.commit(n);
                let (pos, last, end) = buf.offsets();
                prop_assert!(pos <= last && last <= end);
                if n % 2 == 0 {
                    let _ = buf.take_filled();
                    let (pos, last, end) = buf.offsets();
                    prop_assert!(pos <= last && last <= end);
                }
            }
        }
    }
}
