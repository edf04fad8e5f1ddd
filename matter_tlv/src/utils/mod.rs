pub mod writebuf;
