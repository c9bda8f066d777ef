//! 基于下标的侵入式双向链表
//!
//! 所有节点的前后链接集中存放在一个定长数组（`LinkArena`）中，节点与链表头都用下标表示。
//! 链表头是一个哨兵节点：空链表时它的前后链接都指向自己。
//!
//! 链接本身是原子量，因此仓库可以在多个锁之间共享；
//! 但同一条链表上的所有修改必须由保护这条链表的锁串行化，仓库不负责这一点。

use core::sync::atomic::{AtomicUsize, Ordering};

/// 无效下标
pub const NIL: usize = usize::MAX;

/// 一个节点的前驱与后继
#[derive(Debug)]
struct Link {
    prev: AtomicUsize,
    next: AtomicUsize,
}

impl Link {
    fn new() -> Self {
        Self {
            prev: AtomicUsize::new(NIL),
            next: AtomicUsize::new(NIL),
        }
    }
}

/// 链接仓库
#[derive(Debug)]
pub struct LinkArena {
    links: Box<[Link]>,
}

impl LinkArena {
    /// 创建容纳 `len` 个节点（含哨兵）的仓库，所有节点初始都不在任何链表中。
    pub fn new(len: usize) -> Self {
        Self {
            links: (0..len).map(|_| Link::new()).collect(),
        }
    }

    /// 初始化链表头
    ///
    /// # 功能说明
    /// 将哨兵初始化为自环状态，形成空链表
    pub fn init(&self, head: usize) {
        self.set_prev(head, head);
        self.set_next(head, head);
    }

    /// 将节点插入链表头部
    ///
    /// # 参数
    /// - `head`: 链表哨兵；
    /// - `node`: 要插入的节点，此前不能在任何链表中。
    pub fn push_front(&self, head: usize, node: usize) {
        let first = self.next(head);
        self.set_prev(node, head);
        self.set_next(node, first);
        self.set_prev(first, node);
        self.set_next(head, node);
    }

    /// 从链表头部弹出节点
    ///
    /// 链表为空时返回 `None`。
    pub fn pop_front(&self, head: usize) -> Option<usize> {
        let first = self.first(head)?;
        self.remove(first);
        Some(first)
    }

    /// 将节点从它所在的链表中摘除
    ///
    /// 摘除后节点的链接被置为 `NIL`，防止残留链接被误用。
    pub fn remove(&self, node: usize) {
        let prev = self.prev(node);
        let next = self.next(node);
        debug_assert!(prev != NIL && next != NIL, "list: remove unlinked node {}", node);
        self.set_next(prev, next);
        self.set_prev(next, prev);
        self.set_prev(node, NIL);
        self.set_next(node, NIL);
    }

    /// 节点当前是否挂在某条链表上
    pub fn is_linked(&self, node: usize) -> bool {
        self.next(node) != NIL
    }

    pub fn is_list_empty(&self, head: usize) -> bool {
        self.next(head) == head
    }

    /// 第一个节点
    pub fn first(&self, head: usize) -> Option<usize> {
        let first = self.next(head);
        if first == head {
            None
        } else {
            Some(first)
        }
    }

    /// 从头到尾遍历
    pub fn iter(&self, head: usize) -> Iter<'_> {
        Iter {
            arena: self,
            head,
            cur: self.next(head),
            forward: true,
        }
    }

    /// 从尾到头遍历
    pub fn iter_rev(&self, head: usize) -> Iter<'_> {
        Iter {
            arena: self,
            head,
            cur: self.prev(head),
            forward: false,
        }
    }

    #[inline]
    fn prev(&self, node: usize) -> usize {
        self.links[node].prev.load(Ordering::Relaxed)
    }

    #[inline]
    fn next(&self, node: usize) -> usize {
        self.links[node].next.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_prev(&self, node: usize, prev: usize) {
        self.links[node].prev.store(prev, Ordering::Relaxed);
    }

    #[inline]
    fn set_next(&self, node: usize, next: usize) {
        self.links[node].next.store(next, Ordering::Relaxed);
    }
}

/// 链表迭代器
///
/// 迭代期间不得修改这条链表。
pub struct Iter<'a> {
    arena: &'a LinkArena,
    head: usize,
    cur: usize,
    forward: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == self.head || self.cur == NIL {
            return None;
        }
        let node = self.cur;
        self.cur = if self.forward {
            self.arena.next(node)
        } else {
            self.arena.prev(node)
        };
        Some(node)
    }
}
