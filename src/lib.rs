/*!
    master side dynamic addressing for half-duplex multidrop buses.

    many low-resource devices share one bus without pre-configured addresses: a joining
    device picks a random 32bit identifier, broadcasts a request, and the [master::Master]
    grants, confirms or negates a bus address for it. this crate implements that allocation
    state machine and the device table behind it.

    the transport below (framing, checksums, acknowledgements, physical medium) is out of
    scope and abstracted by the [transport::Transport] trait.
*/
#![no_std]

mod utils;

pub mod control;
pub mod table;
pub mod transport;
pub mod master;
