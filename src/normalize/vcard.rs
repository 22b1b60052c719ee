//! VCARD 3.0 synthesis for providers that deliver contacts as structured
//! JSON instead of vcard text.

pub struct VcardPhone {
    pub phone: String,
}

pub struct VcardContact {
    pub name: String,
    pub phones: Vec<VcardPhone>,
}

pub fn to_vcard(contacts: &[VcardContact]) -> String {
    let mut vcard = String::new();
    for contact in contacts {
        vcard.push_str("BEGIN:VCARD\nVERSION:3.0\n");
        vcard.push_str(&format!("N:{}\n", contact.name));
        for phone in &contact.phones {
            vcard.push_str(&format!("TEL;TYPE=CELL:{}\n", phone.phone));
        }
        vcard.push_str("END:VCARD\n");
    }
    vcard
}
