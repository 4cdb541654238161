//! Attribute table for the GATT server role.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::att::AttErrorCode;
use crate::cursor::WriteCursor;
pub use crate::types::uuid::Uuid;
use crate::Error;

/// UUID for generic access service
pub const GENERIC_ACCESS_SERVICE_UUID16: Uuid = Uuid::Uuid16(0x1800u16.to_le_bytes());

/// UUID for device name characteristic
pub const CHARACTERISTIC_DEVICE_NAME_UUID16: Uuid = Uuid::Uuid16(0x2A00u16.to_le_bytes());

/// UUID for appearance characteristic
pub const CHARACTERISTIC_APPEARANCE_UUID16: Uuid = Uuid::Uuid16(0x2A01u16.to_le_bytes());

/// UUID for primary service declaration
pub const PRIMARY_SERVICE_UUID16: Uuid = Uuid::Uuid16(0x2800u16.to_le_bytes());

/// UUID for characteristic declaration
pub const CHARACTERISTIC_UUID16: Uuid = Uuid::Uuid16(0x2803u16.to_le_bytes());

/// UUID for the client characteristic configuration descriptor
pub const CHARACTERISTIC_CCCD_UUID16: Uuid = Uuid::Uuid16(0x2902u16.to_le_bytes());

/// Characteristic properties
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum CharacteristicProp {
    /// Broadcast
    Broadcast = 0x01,
    /// Read
    Read = 0x02,
    /// Write without response
    WriteWithoutResponse = 0x04,
    /// Write
    Write = 0x08,
    /// Notify
    Notify = 0x10,
    /// Indicate
    Indicate = 0x20,
    /// Authenticated writes
    AuthenticatedWrite = 0x40,
    /// Extended properties
    Extended = 0x80,
}

/// Callbacks backing a characteristic whose value is produced on access.
pub trait AttributeHandler {
    /// Read the value at `offset` into `dest`, returning the length written.
    fn read(&self, offset: usize, dest: &mut [u8]) -> Result<usize, AttErrorCode>;

    /// Write `data` at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), AttErrorCode> {
        let _ = (offset, data);
        Err(AttErrorCode::WRITE_NOT_PERMITTED)
    }
}

/// Attribute metadata.
pub struct Attribute<'a> {
    pub(crate) uuid: Uuid,
    pub(crate) handle: u16,
    pub(crate) last_handle_in_group: u16,
    pub(crate) data: AttributeData<'a>,
}

impl<'a> Attribute<'a> {
    const EMPTY: Option<Attribute<'a>> = None;

    pub(crate) fn new(uuid: Uuid, data: AttributeData<'a>) -> Attribute<'a> {
        Attribute {
            uuid,
            handle: 0,
            data,
            last_handle_in_group: 0xffff,
        }
    }
}

pub(crate) enum AttributeData<'d> {
    Service {
        uuid: Uuid,
    },
    ReadOnlyData {
        props: CharacteristicProps,
        value: &'d [u8],
    },
    Data {
        props: CharacteristicProps,
        value: &'d mut [u8],
    },
    /// A value produced or consumed by callbacks on every access.
    Handler {
        props: CharacteristicProps,
        handler: &'d dyn AttributeHandler,
    },
    Declaration {
        props: CharacteristicProps,
        handle: u16,
        uuid: Uuid,
    },
    /// Per-connection state for this descriptor lives in the server, this
    /// is only the table entry.
    Cccd,
}

impl AttributeData<'_> {
    pub(crate) fn readable(&self) -> bool {
        match self {
            Self::Data { props, .. } => props.any(&[CharacteristicProp::Read]),
            Self::Handler { props, .. } => props.any(&[CharacteristicProp::Read]),
            _ => true,
        }
    }

    pub(crate) fn writable(&self) -> bool {
        match self {
            Self::Data { props, .. } | Self::Handler { props, .. } => props.any(&[
                CharacteristicProp::Write,
                CharacteristicProp::WriteWithoutResponse,
                CharacteristicProp::AuthenticatedWrite,
            ]),
            Self::Cccd => true,
            _ => false,
        }
    }

    pub(crate) fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize, AttErrorCode> {
        if !self.readable() {
            return Err(AttErrorCode::READ_NOT_PERMITTED);
        }
        match self {
            Self::ReadOnlyData { value, .. } => read_slice(value, offset, data),
            Self::Data { value, .. } => read_slice(value, offset, data),
            Self::Service { uuid } => read_slice(uuid.as_raw(), offset, data),
            Self::Handler { handler, .. } => handler.read(offset, data),
            Self::Cccd => {
                // The server substitutes the per-connection value.
                if offset > 0 {
                    return Err(AttErrorCode::INVALID_OFFSET);
                }
                read_slice(&[0, 0], 0, data)
            }
            Self::Declaration { props, handle, uuid } => {
                if offset > 0 {
                    return Err(AttErrorCode::INVALID_OFFSET);
                }
                let mut w = WriteCursor::new(data);
                w.write(props.0)?;
                w.write(*handle)?;
                w.append(uuid.as_raw())?;
                Ok(w.len())
            }
        }
    }

    pub(crate) fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), AttErrorCode> {
        if !self.writable() {
            return Err(AttErrorCode::WRITE_NOT_PERMITTED);
        }
        match self {
            Self::Data { value, .. } => {
                if offset + data.len() <= value.len() {
                    value[offset..offset + data.len()].copy_from_slice(data);
                    Ok(())
                } else {
                    Err(AttErrorCode::INVALID_OFFSET)
                }
            }
            Self::Handler { handler, .. } => handler.write(offset, data),
            // Cccd writes are handled per connection by the server.
            Self::Cccd => Ok(()),
            _ => Err(AttErrorCode::WRITE_NOT_PERMITTED),
        }
    }
}

fn read_slice(value: &[u8], offset: usize, data: &mut [u8]) -> Result<usize, AttErrorCode> {
    if offset > value.len() {
        return Err(AttErrorCode::INVALID_OFFSET);
    }
    let len = data.len().min(value.len() - offset);
    data[..len].copy_from_slice(&value[offset..offset + len]);
    Ok(len)
}

impl fmt::Debug for Attribute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("uuid", &self.uuid)
            .field("handle", &self.handle)
            .field("last_handle_in_group", &self.last_handle_in_group)
            .field("readable", &self.data.readable())
            .field("writable", &self.data.writable())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Attribute<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", defmt::Debug2Format(self))
    }
}

/// A table of attributes.
///
/// Handles are assigned contiguously starting from 1, in the order the
/// services and characteristics are added.
pub struct AttributeTable<'d, M: RawMutex, const MAX: usize> {
    inner: Mutex<M, RefCell<InnerTable<'d, MAX>>>,
    handle: u16,
}

pub(crate) struct InnerTable<'d, const MAX: usize> {
    attributes: [Option<Attribute<'d>>; MAX],
    len: usize,
}

impl<'d, const MAX: usize> InnerTable<'d, MAX> {
    fn push(&mut self, attribute: Attribute<'d>) {
        if self.len == MAX {
            panic!("no space for more attributes")
        }
        self.attributes[self.len].replace(attribute);
        self.len += 1;
    }
}

impl<'d, M: RawMutex, const MAX: usize> Default for AttributeTable<'d, M, MAX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d, M: RawMutex, const MAX: usize> AttributeTable<'d, M, MAX> {
    /// Create a new GATT table.
    pub fn new() -> Self {
        Self {
            handle: 1,
            inner: Mutex::new(RefCell::new(InnerTable {
                len: 0,
                attributes: [Attribute::EMPTY; MAX],
            })),
        }
    }

    pub(crate) fn with_inner<F: Fn(&mut InnerTable<'d, MAX>)>(&self, f: F) {
        self.inner.lock(|inner| {
            let mut table = inner.borrow_mut();
            f(&mut table);
        })
    }

    pub(crate) fn iterate<F: FnMut(AttributeIterator<'_, 'd>) -> R, R>(&self, mut f: F) -> R {
        self.inner.lock(|inner| {
            let mut table = inner.borrow_mut();
            let len = table.len;
            let it = AttributeIterator {
                attributes: &mut table.attributes[..],
                pos: 0,
                len,
            };
            f(it)
        })
    }

    fn push(&mut self, mut attribute: Attribute<'d>) -> u16 {
        let handle = self.handle;
        attribute.handle = handle;
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.push(attribute);
        });
        self.handle += 1;
        handle
    }

    /// Add a service (a group of characteristics) to the attribute table.
    pub fn add_service(&mut self, service: Service) -> ServiceBuilder<'_, 'd, M, MAX> {
        let len = self.inner.lock(|i| i.borrow().len);
        let handle = self.push(Attribute::new(
            PRIMARY_SERVICE_UUID16,
            AttributeData::Service { uuid: service.uuid },
        ));
        ServiceBuilder {
            handle: AttributeHandle { handle },
            start: len,
            table: self,
        }
    }

    /// Set the value of a characteristic.
    ///
    /// The provided data must exactly match the size of the storage for the
    /// characteristic. If the characteristic for the handle cannot be found,
    /// an error is returned.
    pub fn set(&self, characteristic: Characteristic, input: &[u8]) -> Result<(), Error> {
        self.iterate(|mut it| {
            while let Some(att) = it.next() {
                if att.handle == characteristic.handle {
                    if let AttributeData::Data { value, .. } = &mut att.data {
                        if value.len() != input.len() {
                            return Err(Error::InvalidValue);
                        }
                        value.copy_from_slice(input);
                        return Ok(());
                    }
                }
            }
            Err(Error::NotFound)
        })
    }

    /// Read the value of the characteristic and pass the value to the provided closure.
    ///
    /// If the characteristic for the handle cannot be found, an error is returned.
    pub fn get<F: FnMut(&[u8]) -> T, T>(&self, characteristic: Characteristic, mut f: F) -> Result<T, Error> {
        self.iterate(|mut it| {
            while let Some(att) = it.next() {
                if att.handle == characteristic.handle {
                    match &att.data {
                        AttributeData::Data { value, .. } => return Ok(f(value)),
                        AttributeData::ReadOnlyData { value, .. } => return Ok(f(value)),
                        _ => {}
                    }
                }
            }
            Err(Error::NotFound)
        })
    }

    pub(crate) fn find_characteristic_by_value_handle(&self, handle: u16) -> Result<Characteristic, Error> {
        self.iterate(|mut it| {
            while let Some(att) = it.next() {
                if att.handle == handle {
                    let cccd_handle = match it.next() {
                        Some(next) if matches!(next.data, AttributeData::Cccd) => Some(next.handle),
                        _ => None,
                    };
                    return Ok(Characteristic { handle, cccd_handle });
                }
            }
            Err(Error::NotFound)
        })
    }
}

/// Handle to an attribute in the attribute table.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttributeHandle {
    pub(crate) handle: u16,
}

impl From<u16> for AttributeHandle {
    fn from(handle: u16) -> Self {
        Self { handle }
    }
}

/// Builder for constructing GATT service definitions.
pub struct ServiceBuilder<'r, 'd, M: RawMutex, const MAX: usize> {
    handle: AttributeHandle,
    start: usize,
    table: &'r mut AttributeTable<'d, M, MAX>,
}

impl<'d, M: RawMutex, const MAX: usize> ServiceBuilder<'_, 'd, M, MAX> {
    fn add_characteristic_internal(
        &mut self,
        uuid: Uuid,
        props: CharacteristicProps,
        data: AttributeData<'d>,
    ) -> CharacteristicBuilder<'_, 'd, M, MAX> {
        // Declaration, value, then the CCCD when the properties ask for one.
        let value_handle = self.table.handle + 1;
        self.table.push(Attribute::new(
            CHARACTERISTIC_UUID16,
            AttributeData::Declaration {
                props,
                handle: value_handle,
                uuid: uuid.clone(),
            },
        ));
        self.table.push(Attribute::new(uuid, data));

        let cccd_handle = if props.any(&[CharacteristicProp::Notify, CharacteristicProp::Indicate]) {
            Some(self.table.push(Attribute::new(CHARACTERISTIC_CCCD_UUID16, AttributeData::Cccd)))
        } else {
            None
        };

        CharacteristicBuilder {
            handle: Characteristic {
                handle: value_handle,
                cccd_handle,
            },
            table: self.table,
        }
    }

    /// Add a characteristic to this service with a reference to a mutable storage buffer.
    pub fn add_characteristic<U: Into<Uuid>>(
        &mut self,
        uuid: U,
        props: &[CharacteristicProp],
        storage: &'d mut [u8],
    ) -> CharacteristicBuilder<'_, 'd, M, MAX> {
        let props = props.into();
        self.add_characteristic_internal(uuid.into(), props, AttributeData::Data { props, value: storage })
    }

    /// Add a characteristic to this service with a reference to an immutable storage buffer.
    pub fn add_characteristic_ro<U: Into<Uuid>>(&mut self, uuid: U, value: &'d [u8]) -> CharacteristicBuilder<'_, 'd, M, MAX> {
        let props = [CharacteristicProp::Read].into();
        self.add_characteristic_internal(uuid.into(), props, AttributeData::ReadOnlyData { props, value })
    }

    /// Add a characteristic whose value is produced by callbacks on every access.
    pub fn add_characteristic_handler<U: Into<Uuid>>(
        &mut self,
        uuid: U,
        props: &[CharacteristicProp],
        handler: &'d dyn AttributeHandler,
    ) -> CharacteristicBuilder<'_, 'd, M, MAX> {
        let props = props.into();
        self.add_characteristic_internal(uuid.into(), props, AttributeData::Handler { props, handler })
    }

    /// Finish construction of the service and return a handle.
    pub fn build(self) -> AttributeHandle {
        self.handle
    }
}

impl<'d, M: RawMutex, const MAX: usize> Drop for ServiceBuilder<'_, 'd, M, MAX> {
    fn drop(&mut self) {
        let last_handle = self.table.handle - 1;
        self.table.with_inner(|inner| {
            for item in inner.attributes[self.start..inner.len].iter_mut() {
                unwrap!(item.as_mut()).last_handle_in_group = last_handle;
            }
        });
    }
}

/// A characteristic in the attribute table.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Characteristic {
    pub(crate) cccd_handle: Option<u16>,
    pub(crate) handle: u16,
}

impl Characteristic {
    /// The value handle of this characteristic.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The handle of the client configuration descriptor, if the
    /// characteristic supports notifications or indications.
    pub fn cccd_handle(&self) -> Option<u16> {
        self.cccd_handle
    }
}

/// Builder for characteristics.
pub struct CharacteristicBuilder<'r, 'd, M: RawMutex, const MAX: usize> {
    handle: Characteristic,
    table: &'r mut AttributeTable<'d, M, MAX>,
}

impl<'d, M: RawMutex, const MAX: usize> CharacteristicBuilder<'_, 'd, M, MAX> {
    fn add_descriptor_internal(&mut self, uuid: Uuid, data: AttributeData<'d>) -> DescriptorHandle {
        let handle = self.table.push(Attribute::new(uuid, data));
        DescriptorHandle { handle }
    }

    /// Add a characteristic descriptor for this characteristic.
    pub fn add_descriptor<U: Into<Uuid>>(
        &mut self,
        uuid: U,
        props: &[CharacteristicProp],
        data: &'d mut [u8],
    ) -> DescriptorHandle {
        let props = props.into();
        self.add_descriptor_internal(uuid.into(), AttributeData::Data { props, value: data })
    }

    /// Add a read only characteristic descriptor for this characteristic.
    pub fn add_descriptor_ro<U: Into<Uuid>>(&mut self, uuid: U, data: &'d [u8]) -> DescriptorHandle {
        let props = [CharacteristicProp::Read].into();
        self.add_descriptor_internal(uuid.into(), AttributeData::ReadOnlyData { props, value: data })
    }

    /// Return the built characteristic.
    pub fn build(self) -> Characteristic {
        self.handle
    }
}

/// Characteristic descriptor handle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug)]
pub struct DescriptorHandle {
    pub(crate) handle: u16,
}

impl DescriptorHandle {
    /// The attribute handle of this descriptor.
    pub fn handle(&self) -> u16 {
        self.handle
    }
}

/// Iterator over attributes.
pub struct AttributeIterator<'a, 'd> {
    attributes: &'a mut [Option<Attribute<'d>>],
    pos: usize,
    len: usize,
}

impl<'d> AttributeIterator<'_, 'd> {
    /// Return next attribute in iterator.
    pub fn next<'m>(&'m mut self) -> Option<&'m mut Attribute<'d>> {
        if self.pos < self.len {
            let i = self.attributes[self.pos].as_mut();
            self.pos += 1;
            i
        } else {
            None
        }
    }
}

/// A GATT service.
pub struct Service {
    /// UUID of the service.
    pub uuid: Uuid,
}

impl Service {
    /// Create a new service with a uuid.
    pub fn new<U: Into<Uuid>>(uuid: U) -> Self {
        Self { uuid: uuid.into() }
    }
}

/// Properties of a characteristic.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct CharacteristicProps(pub(crate) u8);

impl<'a> From<&'a [CharacteristicProp]> for CharacteristicProps {
    fn from(props: &'a [CharacteristicProp]) -> Self {
        let mut val: u8 = 0;
        for prop in props {
            val |= *prop as u8;
        }
        CharacteristicProps(val)
    }
}

impl<const T: usize> From<[CharacteristicProp; T]> for CharacteristicProps {
    fn from(props: [CharacteristicProp; T]) -> Self {
        let mut val: u8 = 0;
        for prop in props {
            val |= prop as u8;
        }
        CharacteristicProps(val)
    }
}

impl CharacteristicProps {
    /// Check if any of the properties are set.
    pub fn any(&self, props: &[CharacteristicProp]) -> bool {
        for p in props {
            if (*p as u8) & self.0 != 0 {
                return true;
            }
        }
        false
    }
}
